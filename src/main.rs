//! repofs: mount a git repository as a writable filesystem
//!
//! The repository is cloned into a fresh directory under the cache dir, served
//! through FUSE, and every burst of changes is committed and pushed back.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use repofs::backing_store::WorkTree;
use repofs::config::{ProjectConfig, Settings};
use repofs::log_appender::setup_logging;
use repofs::sync::GitRepository;

#[derive(Parser, Debug)]
#[command(name = "repofs", version, about = "Mount a git repository as a writable filesystem")]
struct Cli {
    /// Repository URL to clone and mount
    #[arg(long = "git", value_name = "URL")]
    git: Option<String>,

    /// Owner uid reported for every file
    #[arg(long)]
    uid: Option<u32>,

    /// Owner gid reported for every file
    #[arg(long)]
    gid: Option<u32>,

    /// Private ssh key; the ssh agent is used when omitted
    #[arg(long = "auth", value_name = "KEYFILE")]
    auth: Option<PathBuf>,

    /// Settings file instead of the default one
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Directory to mount the repository on
    mount_path: PathBuf,
}

impl Cli {
    /// Command line flags take precedence over the settings file
    fn apply(&self, settings: &mut Settings) {
        if let Some(url) = &self.git {
            settings.remote_url = Some(url.clone());
        }
        if let Some(uid) = self.uid {
            settings.uid = uid;
        }
        if let Some(gid) = self.gid {
            settings.gid = gid;
        }
        if let Some(key) = &self.auth {
            settings.auth_key_file = Some(key.clone());
        }
        if let Some(level) = &self.log_level {
            settings.log_level = level.clone();
        }
    }
}

fn check_mount_path(mount_path: &Path) -> Result<()> {
    // Clear a stale mount left behind by a crashed run
    let _ = std::process::Command::new("fusermount")
        .arg("-u")
        .arg(mount_path)
        .output();

    if !mount_path.exists() {
        bail!("Mount point does not exist: {}", mount_path.display());
    }
    if !mount_path.is_dir() {
        bail!("Mount point is not a directory: {}", mount_path.display());
    }
    Ok(())
}

async fn wait_for_ctrl_c() -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("Failed to install Ctrl-C handler")?;
    rx.recv().await;
    Ok(())
}

/// Clone, mount and serve until Ctrl-C. Returns whether changes were left
/// unsynchronized in the work tree.
async fn serve(settings: &Settings, url: &str, mount_path: &Path, worktree: &Path) -> Result<bool> {
    if let Some(parent) = worktree.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let repo = {
        let remote = url.to_string();
        let dest = worktree.to_path_buf();
        let depth = settings.clone_depth;
        let identity = settings.sync.identity();
        let key_file = settings.auth_key_file.clone();
        tokio::task::spawn_blocking(move || GitRepository::clone_remote(&remote, dest, depth, identity, key_file))
            .await
            .context("Clone task failed")?
            .with_context(|| format!("Failed to clone {}", url))?
    };

    let store = Arc::new(WorkTree::new(worktree));
    let handle = repofs::mount(mount_path, store, Arc::new(repo), settings).await?;
    info!("🚀 {} mounted at {}, press Ctrl-C to unmount", url, mount_path.display());

    wait_for_ctrl_c().await?;

    let status = handle.unmount().await;
    if status.dirty {
        warn!(
            "Unsynchronized changes remain in {}: {}",
            worktree.display(),
            status.last_error.as_deref().unwrap_or("final sync did not run")
        );
    }
    Ok(status.dirty)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut project_config = ProjectConfig::new(cli.config.as_deref())?;
    cli.apply(&mut project_config.settings);
    let settings = project_config.settings.clone();

    setup_logging(&project_config.logs_dir(), &settings.log_level)
        .context("Failed to setup logging")?;

    let url = settings
        .remote_url
        .clone()
        .ok_or_else(|| anyhow!("No repository given; pass --git URL or set remote_url"))?;
    check_mount_path(&cli.mount_path)?;

    let worktree = project_config
        .worktrees_dir()
        .join(Uuid::new_v4().to_string());
    info!("Work tree: {}", worktree.display());

    let result = serve(&settings, &url, &cli.mount_path, &worktree).await;
    let keep_worktree = match &result {
        Ok(dirty) => *dirty,
        Err(e) => {
            error!("{:#}", e);
            false
        }
    };

    if worktree.exists() && !keep_worktree {
        if let Err(e) = fs::remove_dir_all(&worktree) {
            warn!("Failed to remove work tree {}: {}", worktree.display(), e);
        }
    }
    result.map(|_| ())
}
