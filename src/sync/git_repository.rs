//! Source control capability used by the sync manager, with its libgit2
//! implementation.
//!
//! All git2 calls are blocking, so `GitRepository` runs each step in
//! `tokio::task::spawn_blocking`.

use async_trait::async_trait;
use git2::build::RepoBuilder;
use git2::{
    Commit, Cred, CredentialType, ErrorClass, ErrorCode, FetchOptions, IndexAddOption, PushOptions,
    RemoteCallbacks, Repository, Signature,
};
use log::{debug, info};
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Remote pushed to by every cycle
pub const REMOTE_NAME: &str = "origin";

/// User name for ssh when the URL does not carry one
const DEFAULT_SSH_USER: &str = "git";

/// Credential callback invocations before authentication is declared failed
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

/// How a failed cycle affects retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Retried on the next tick
    Transient,
    /// Retrying cannot help until something changes
    Permanent,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("git: {0}")]
    Git(#[from] git2::Error),

    #[error("push of {reference} rejected: {message}")]
    PushRejected { reference: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("background git task failed: {0}")]
    Task(String),
}

impl SyncError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::Git(e) => classify_git_error(e),
            SyncError::PushRejected { .. } => FailureKind::Transient,
            SyncError::Config(_) => FailureKind::Permanent,
            SyncError::Task(_) => FailureKind::Transient,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind() == FailureKind::Permanent
    }
}

fn classify_git_error(e: &git2::Error) -> FailureKind {
    match e.code() {
        ErrorCode::Auth | ErrorCode::Certificate | ErrorCode::Owner => return FailureKind::Permanent,
        ErrorCode::NotFound | ErrorCode::InvalidSpec | ErrorCode::BareRepo => {
            return FailureKind::Permanent
        }
        _ => {}
    }
    match e.class() {
        ErrorClass::Config | ErrorClass::Ssl => FailureKind::Permanent,
        // Capability refusals such as a shallow fetch over the local transport
        _ if e.message().contains("not supported") => FailureKind::Permanent,
        _ => FailureKind::Transient,
    }
}

/// Identity and message every automatic commit is made with
#[derive(Debug, Clone)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
    pub message: String,
}

/// What one synchronization cycle needs from source control
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Stage every change of the working tree and commit it. Returns the new
    /// commit id, or `None` when the staged tree equals HEAD.
    async fn commit_all(&self) -> Result<Option<String>, SyncError>;

    /// Push the current branch to the remote
    async fn push(&self) -> Result<(), SyncError>;
}

struct RepoInner {
    repo: Mutex<Repository>,
    root: PathBuf,
    identity: CommitIdentity,
    key_file: Option<PathBuf>,
}

/// Local clone of the mounted repository
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<RepoInner>,
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("root", &self.inner.root)
            .finish()
    }
}

/// Whether `url` is served by libgit2's local transport: a `file://` URL or
/// a path to an existing repository
fn is_local_url(url: &str) -> bool {
    url.starts_with("file://") || Path::new(url).exists()
}

/// Callbacks answering credential requests from the key file when one is
/// configured, otherwise from the ssh agent.
fn remote_callbacks<'a>(key_file: Option<&'a Path>, attempts: &'a Cell<usize>) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username, allowed| {
        attempts.set(attempts.get() + 1);
        if attempts.get() > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Ssh,
                format!("authentication to {} failed", url),
            ));
        }

        let user = username.unwrap_or(DEFAULT_SSH_USER);
        if allowed.contains(CredentialType::USERNAME) {
            return Cred::username(user);
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            return match key_file {
                Some(key) => Cred::ssh_key(user, None, key, None),
                None => Cred::ssh_key_from_agent(user),
            };
        }
        Cred::default()
    });
    callbacks
}

impl GitRepository {
    pub fn open(
        root: impl Into<PathBuf>,
        identity: CommitIdentity,
        key_file: Option<PathBuf>,
    ) -> Result<Self, SyncError> {
        let root = root.into();
        let repo = Repository::open(&root)?;
        Ok(Self::from_parts(repo, root, identity, key_file))
    }

    /// Clone `url` into `dest`. `depth` limits history for a shallow clone.
    pub fn clone_remote(
        url: &str,
        dest: impl Into<PathBuf>,
        depth: Option<u32>,
        identity: CommitIdentity,
        key_file: Option<PathBuf>,
    ) -> Result<Self, SyncError> {
        let dest = dest.into();
        info!("Cloning {} into {}", url, dest.display());

        let attempts = Cell::new(0);
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(remote_callbacks(key_file.as_deref(), &attempts));
        match depth {
            Some(_) if is_local_url(url) => {
                debug!("Local transport cannot fetch shallow, cloning {} in full", url);
            }
            Some(depth) => {
                let depth = i32::try_from(depth)
                    .map_err(|_| SyncError::Config(format!("clone depth {} is too large", depth)))?;
                fetch.depth(depth);
            }
            None => {}
        }

        let repo = RepoBuilder::new().fetch_options(fetch).clone(url, &dest)?;
        Ok(Self::from_parts(repo, dest, identity, key_file))
    }

    fn from_parts(
        repo: Repository,
        root: PathBuf,
        identity: CommitIdentity,
        key_file: Option<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(RepoInner {
                repo: Mutex::new(repo),
                root,
                identity,
                key_file,
            }),
        }
    }

    /// Working tree directory
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&RepoInner) -> Result<T, SyncError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?
    }
}

impl RepoInner {
    fn lock(&self) -> MutexGuard<'_, Repository> {
        self.repo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn commit_all(&self) -> Result<Option<String>, SyncError> {
        let repo = self.lock();
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        let tree_oid = index.write_tree()?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        match &parent {
            Some(parent) if parent.tree_id() == tree_oid => {
                debug!("Working tree matches HEAD, nothing to commit");
                return Ok(None);
            }
            None if index.is_empty() => {
                debug!("Empty working tree on unborn branch, nothing to commit");
                return Ok(None);
            }
            _ => {}
        }

        let tree = repo.find_tree(tree_oid)?;
        let sig = Signature::now(&self.identity.name, &self.identity.email)?;
        let parents: Vec<&Commit> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, &self.identity.message, &tree, &parents)?;

        info!("Committed {}", oid);
        Ok(Some(oid.to_string()))
    }

    fn push(&self) -> Result<(), SyncError> {
        let repo = self.lock();
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch => {
                debug!("No commits yet, skipping push");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if !head.is_branch() {
            return Err(SyncError::Config("HEAD is not on a branch".to_string()));
        }
        let refname = head
            .name()
            .ok_or_else(|| SyncError::Config("branch name is not valid UTF-8".to_string()))?
            .to_string();

        let mut remote = repo.find_remote(REMOTE_NAME)?;
        let attempts = Cell::new(0);
        let rejected: RefCell<Option<(String, String)>> = RefCell::new(None);

        {
            let mut callbacks = remote_callbacks(self.key_file.as_deref(), &attempts);
            callbacks.push_update_reference(|reference, status| {
                if let Some(message) = status {
                    *rejected.borrow_mut() = Some((reference.to_string(), message.to_string()));
                }
                Ok(())
            });
            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);

            let refspec = format!("{}:{}", refname, refname);
            debug!("Pushing {} to {}", refspec, REMOTE_NAME);
            remote.push(&[refspec.as_str()], Some(&mut options))?;
        }

        if let Some((reference, message)) = rejected.into_inner() {
            return Err(SyncError::PushRejected { reference, message });
        }
        info!("Pushed {} to {}", refname, REMOTE_NAME);
        Ok(())
    }
}

#[async_trait]
impl SourceControl for GitRepository {
    async fn commit_all(&self) -> Result<Option<String>, SyncError> {
        self.blocking(|inner| inner.commit_all()).await
    }

    async fn push(&self) -> Result<(), SyncError> {
        self.blocking(|inner| inner.push()).await
    }
}
