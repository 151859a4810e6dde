use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::{CommitIdentity, DEFAULT_QUEUE_CAPACITY};

static SETTINGS_FILE_NAME: &str = "settings.json";

pub struct ProjectConfig {
    pub settings: Settings,
    pub project_dirs: ProjectDirs,
}

impl ProjectConfig {
    /// Load settings from `config_file`, or from `settings.json` in the
    /// project config directory when no file is given.
    pub fn new(config_file: Option<&Path>) -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "repofs", "repofs")
            .ok_or_else(|| anyhow!("Failed to get project directories"))?;
        for x in [proj_dirs.config_dir(), proj_dirs.cache_dir(), proj_dirs.data_dir()] {
            if !x.exists() {
                fs::create_dir_all(x)
                    .with_context(|| format!("Failed to create directory {}", x.display()))?;
            }
        }

        let path = match config_file {
            Some(path) => path.to_path_buf(),
            None => proj_dirs.config_dir().join(SETTINGS_FILE_NAME),
        };
        let settings = Settings::new(&path)?;
        Ok(Self {
            settings,
            project_dirs: proj_dirs,
        })
    }

    /// Parent of the per-mount clone directories
    pub fn worktrees_dir(&self) -> PathBuf {
        self.project_dirs.cache_dir().join("worktrees")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.project_dirs.data_dir().join("logs")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// Repository to mount
    pub remote_url: Option<String>,
    /// Private key for ssh; the ssh agent is asked when unset
    pub auth_key_file: Option<PathBuf>,
    /// Owner reported for every node
    pub uid: u32,
    pub gid: u32,
    pub file_permission: u16,
    pub dir_permission: u16,
    /// History depth of the clone, `None` for a full clone
    pub clone_depth: Option<u32>,
    pub log_level: String,
    pub sync: SyncConfig,
}

impl Default for Settings {
    fn default() -> Self {
        // SAFETY: getuid and getgid have no preconditions and cannot fail
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            remote_url: None,
            auth_key_file: None,
            uid,
            gid,
            file_permission: 0o644,
            dir_permission: 0o755,
            clone_depth: Some(1),
            log_level: "info".to_string(),
            sync: SyncConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// How often the manager checks for quiescence
    pub tick_interval: Duration,
    /// Time without changes before a cycle starts
    pub quiescence: Duration,
    pub queue_capacity: usize,
    /// Consecutive transient failures before retries are suspended
    pub max_transient_retries: u32,
    pub author_name: String,
    pub author_email: String,
    pub commit_message: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            quiescence: Duration::from_secs(2),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_transient_retries: 10,
            author_name: "repofs".to_string(),
            author_email: "repofs@localhost".to_string(),
            commit_message: "Auto-commit from repofs".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn identity(&self) -> CommitIdentity {
        CommitIdentity {
            name: self.author_name.clone(),
            email: self.author_email.clone(),
            message: self.commit_message.clone(),
        }
    }
}

impl Settings {
    /// Load from `config_file_path`, writing defaults there when it is missing.
    /// An unreadable or invalid file is an error and is left untouched.
    pub fn new(config_file_path: &Path) -> Result<Self> {
        if !config_file_path.exists() {
            warn!(
                "No settings at {} - creating default config",
                config_file_path.display()
            );
            let default = Self::default();
            default.save_to_file(config_file_path)?;
            return Ok(default);
        }
        Self::load_settings_from_file(config_file_path)
    }

    pub fn load_settings_from_file(config_file_path: &Path) -> Result<Self> {
        if !config_file_path.exists() {
            return Err(anyhow!("Config file not found"));
        }
        let data = fs::read_to_string(config_file_path)?;
        let settings: Self = serde_json::from_str(&data)
            .with_context(|| format!("Invalid settings in {}", config_file_path.display()))?;
        Ok(settings)
    }

    pub fn save_to_file(&self, config_file_path: &Path) -> Result<()> {
        if let Some(parent) = config_file_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(config_file_path, data)?;
        Ok(())
    }
}
