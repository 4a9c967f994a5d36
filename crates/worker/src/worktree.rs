//! Private git worktrees for isolated workers.
//!
//! A worktree starts as a detached checkout of `HEAD`, receives the user's
//! uncommitted changes (tracked diff plus untracked files) and then records
//! a baseline commit. Whatever the worker changes afterwards is exactly the
//! diff against that baseline.

use std::path::{Path, PathBuf};

use sc_domain::error::{Error, Result};

use crate::git::{run_git, run_git_with_input};

const BASELINE_MESSAGE: &str = "serialcode worker baseline";

pub struct Worktree {
    repo: PathBuf,
    path: PathBuf,
    baseline: String,
    // Owns the parent directory; dropped after `remove`.
    _dir: tempfile::TempDir,
}

impl Worktree {
    /// Create a worktree mirroring the current state of `repo`, including
    /// uncommitted and untracked files.
    pub async fn create(repo: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("serialcode-worktree-")
            .tempdir()?;
        let path = dir.path().join("tree");
        let path_str = path.to_string_lossy().into_owned();

        run_git(repo, &["worktree", "add", "--detach", "--quiet", &path_str, "HEAD"]).await?;
        tracing::debug!(repo = %repo.display(), worktree = %path.display(), "worktree added");

        let mut tree = Self {
            repo: repo.to_path_buf(),
            path,
            baseline: String::new(),
            _dir: dir,
        };

        match tree.mirror_local_changes().await {
            Ok(baseline) => {
                tree.baseline = baseline;
                Ok(tree)
            }
            Err(e) => {
                tree.remove().await;
                Err(e)
            }
        }
    }

    async fn mirror_local_changes(&self) -> Result<String> {
        let diff = run_git(&self.repo, &["diff", "--binary", "HEAD"]).await?;
        if !diff.trim().is_empty() {
            run_git_with_input(&self.path, &["apply", "--whitespace=nowarn", "-"], &diff).await?;
        }

        let untracked = run_git(&self.repo, &["ls-files", "--others", "--exclude-standard", "-z"]).await?;
        let mut copied = 0usize;
        for rel in untracked.split('\0').filter(|s| !s.is_empty()) {
            let from = self.repo.join(rel);
            let to = self.path.join(rel);
            if let Some(parent) = to.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&from, &to).await.map_err(|e| {
                Error::Git(format!("cannot copy untracked file {rel}: {e}"))
            })?;
            copied += 1;
        }

        run_git(&self.path, &["add", "-A"]).await?;
        run_git(
            &self.path,
            &[
                "-c",
                "user.name=serialcode",
                "-c",
                "user.email=serialcode@localhost",
                "commit",
                "--quiet",
                "--allow-empty",
                "--no-verify",
                "-m",
                BASELINE_MESSAGE,
            ],
        )
        .await?;
        let baseline = run_git(&self.path, &["rev-parse", "HEAD"]).await?.trim().to_owned();

        tracing::debug!(
            worktree = %self.path.display(),
            baseline = %baseline,
            diff_len = diff.len(),
            untracked = copied,
            "worktree baseline recorded"
        );
        Ok(baseline)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    /// Everything changed in the worktree since the baseline.
    pub async fn patch(&self) -> Result<String> {
        capture_patch(&self.path, &self.baseline).await
    }

    /// Detach the worktree from the repository and delete it. Failures are
    /// logged; the directory itself goes away with the temp dir.
    pub async fn remove(self) {
        let path_str = self.path.to_string_lossy().into_owned();
        if let Err(e) = run_git(&self.repo, &["worktree", "remove", "--force", &path_str]).await {
            tracing::warn!(worktree = %self.path.display(), error = %e, "failed to remove worktree");
        }
        if let Err(e) = run_git(&self.repo, &["worktree", "prune"]).await {
            tracing::warn!(error = %e, "git worktree prune failed");
        }
    }
}

/// Stage everything in `worktree` and diff it against `baseline`. New,
/// deleted and binary files are included.
pub async fn capture_patch(worktree: &Path, baseline: &str) -> Result<String> {
    run_git(worktree, &["add", "-A"]).await?;
    run_git(worktree, &["diff", "--binary", "--cached", baseline]).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::test_repo::init;

    #[tokio::test]
    async fn mirrors_uncommitted_and_untracked_files() {
        let repo = init();
        std::fs::write(repo.path().join("a.txt"), "one\nlocal edit\n").unwrap();
        std::fs::create_dir(repo.path().join("notes")).unwrap();
        std::fs::write(repo.path().join("notes/todo.md"), "draft\n").unwrap();

        let tree = Worktree::create(repo.path()).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(tree.path().join("a.txt")).unwrap(),
            "one\nlocal edit\n"
        );
        assert_eq!(
            std::fs::read_to_string(tree.path().join("notes/todo.md")).unwrap(),
            "draft\n"
        );
        assert!(tree.patch().await.unwrap().is_empty(), "baseline includes local changes");
        tree.remove().await;
    }

    #[tokio::test]
    async fn patch_captures_only_worker_changes() {
        let repo = init();
        std::fs::write(repo.path().join("a.txt"), "one\nlocal edit\n").unwrap();

        let tree = Worktree::create(repo.path()).await.unwrap();
        std::fs::write(tree.path().join("a.txt"), "one\nlocal edit\nworker fix\n").unwrap();
        std::fs::write(tree.path().join("added.rs"), "fn main() {}\n").unwrap();

        let patch = tree.patch().await.unwrap();
        assert!(patch.contains("+worker fix"));
        assert!(!patch.contains("+local edit"));
        assert!(patch.contains("added.rs"));
        tree.remove().await;
    }

    #[tokio::test]
    async fn remove_deletes_the_worktree() {
        let repo = init();
        let tree = Worktree::create(repo.path()).await.unwrap();
        let path = tree.path().to_path_buf();
        assert!(path.exists());
        tree.remove().await;
        assert!(!path.exists());

        let list = run_git(repo.path(), &["worktree", "list"]).await.unwrap();
        assert_eq!(list.lines().count(), 1);
    }

    #[tokio::test]
    async fn outside_a_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Worktree::create(dir.path()).await.is_err());
    }
}
