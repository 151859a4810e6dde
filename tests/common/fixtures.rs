#![allow(dead_code)]
use git2::{Repository, Signature};
use repofs::sync::CommitIdentity;
use std::path::Path;

pub const SEED_FILE: &str = "README.md";
pub const SEED_CONTENT: &str = "# seeded\n";

pub fn identity() -> CommitIdentity {
    CommitIdentity {
        name: "repofs-test".to_string(),
        email: "repofs-test@localhost".to_string(),
        message: "Auto-commit from repofs".to_string(),
    }
}

/// Create a bare repository with one commit on `main` holding `README.md`
pub fn seed_bare_remote(path: &Path) -> anyhow::Result<()> {
    let remote = Repository::init_bare(path)?;
    let sig = Signature::now("seed", "seed@localhost")?;
    let blob = remote.blob(SEED_CONTENT.as_bytes())?;
    let mut builder = remote.treebuilder(None)?;
    builder.insert(SEED_FILE, blob, 0o100644)?;
    let tree_oid = builder.write()?;
    let tree = remote.find_tree(tree_oid)?;
    remote.commit(Some("refs/heads/main"), &sig, &sig, "seed", &tree, &[])?;
    remote.set_head("refs/heads/main")?;
    Ok(())
}

/// Content of `path` in the remote's `main`, if present
pub fn remote_file(remote_dir: &Path, path: &str) -> Option<Vec<u8>> {
    let remote = Repository::open_bare(remote_dir).ok()?;
    let commit = remote.find_reference("refs/heads/main").ok()?.peel_to_commit().ok()?;
    let tree = commit.tree().ok()?;
    let entry = tree.get_path(Path::new(path)).ok()?;
    let blob = remote.find_blob(entry.id()).ok()?;
    Some(blob.content().to_vec())
}

/// Number of commits reachable from the remote's `main`
pub fn remote_commit_count(remote_dir: &Path) -> usize {
    let Ok(remote) = Repository::open_bare(remote_dir) else {
        return 0;
    };
    let Ok(mut walk) = remote.revwalk() else {
        return 0;
    };
    if walk.push_ref("refs/heads/main").is_err() {
        return 0;
    }
    walk.count()
}

pub fn remote_head_author(remote_dir: &Path) -> Option<String> {
    let remote = Repository::open_bare(remote_dir).ok()?;
    let commit = remote.find_reference("refs/heads/main").ok()?.peel_to_commit().ok()?;
    let name = commit.author().name().map(str::to_string);
    name
}
