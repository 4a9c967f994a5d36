//! Thin async wrappers over the `git` CLI.
//!
//! Everything here shells out; stdout is returned verbatim so patches keep
//! their exact bytes. Failures carry git's stderr in [`Error::Git`].

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use sc_domain::error::{Error, Result};

/// Branches tried, in order, when no base is given.
const DEFAULT_BASES: [&str; 2] = ["main", "master"];

fn git_command(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

fn describe(args: &[&str]) -> String {
    format!("git {}", args.join(" "))
}

fn check_output(args: &[&str], output: std::process::Output) -> Result<String> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(Error::Git(format!(
        "{} failed ({}): {}",
        describe(args),
        output.status,
        stderr.trim()
    )))
}

/// Run `git <args>` in `dir` and return its stdout.
pub async fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    tracing::debug!(dir = %dir.display(), command = %describe(args), "running git");
    let output = git_command(dir, args)
        .output()
        .await
        .map_err(|e| Error::Git(format!("cannot run {}: {e}", describe(args))))?;
    check_output(args, output)
}

/// Run `git <args>` in `dir` feeding `input` on stdin.
pub async fn run_git_with_input(dir: &Path, args: &[&str], input: &str) -> Result<String> {
    tracing::debug!(dir = %dir.display(), command = %describe(args), input_len = input.len(), "running git");
    let mut child = git_command(dir, args)
        .stdin(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Git(format!("cannot run {}: {e}", describe(args))))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes()).await?;
        stdin.shutdown().await?;
    }

    let output = child.wait_with_output().await?;
    check_output(args, output)
}

/// Top-level directory of the repository containing `dir`.
pub async fn repo_root(dir: &Path) -> Result<PathBuf> {
    let out = run_git(dir, &["rev-parse", "--show-toplevel"]).await?;
    Ok(PathBuf::from(out.trim()))
}

async fn ref_exists(dir: &Path, reference: &str) -> bool {
    let spec = format!("{reference}^{{commit}}");
    run_git(dir, &["rev-parse", "--verify", "--quiet", &spec])
        .await
        .is_ok()
}

/// Pick the ref to diff against: the explicit one when given (it must
/// exist), else the first of `main`/`master` that exists, else `HEAD`.
pub async fn resolve_base(dir: &Path, explicit: Option<&str>) -> Result<String> {
    if let Some(base) = explicit {
        if ref_exists(dir, base).await {
            return Ok(base.to_owned());
        }
        return Err(Error::Git(format!("base ref '{base}' does not exist")));
    }
    for candidate in DEFAULT_BASES {
        if ref_exists(dir, candidate).await {
            return Ok(candidate.to_owned());
        }
    }
    if ref_exists(dir, "HEAD").await {
        return Ok("HEAD".to_owned());
    }
    Err(Error::Git("repository has no commits".into()))
}

/// Common ancestor of `HEAD` and `base`.
pub async fn merge_base(dir: &Path, base: &str) -> Result<String> {
    let out = run_git(dir, &["merge-base", "HEAD", base]).await?;
    Ok(out.trim().to_owned())
}

/// What changed on this branch: everything between the merge base and the
/// working tree, committed or not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffContext {
    pub base_branch: String,
    pub merge_base: String,
    pub changed_files: Vec<String>,
    pub diff: String,
}

impl DiffContext {
    pub fn is_empty(&self) -> bool {
        self.diff.trim().is_empty() && self.changed_files.is_empty()
    }
}

/// Compute the [`DiffContext`] of the repository at `dir` against `base`
/// (resolved with [`resolve_base`]).
pub async fn compute_diff_context(dir: &Path, base: Option<&str>) -> Result<DiffContext> {
    let base_branch = resolve_base(dir, base).await?;
    let merge_base = merge_base(dir, &base_branch).await?;

    let diff = run_git(dir, &["diff", &merge_base]).await?;

    let mut changed_files: Vec<String> = run_git(dir, &["diff", "--name-only", &merge_base])
        .await?
        .lines()
        .map(str::to_owned)
        .collect();
    let untracked = run_git(dir, &["ls-files", "--others", "--exclude-standard"]).await?;
    for file in untracked.lines() {
        if !changed_files.iter().any(|f| f == file) {
            changed_files.push(file.to_owned());
        }
    }

    tracing::debug!(
        base = %base_branch,
        merge_base = %merge_base,
        files = changed_files.len(),
        diff_len = diff.len(),
        "computed diff context"
    );

    Ok(DiffContext {
        base_branch,
        merge_base,
        changed_files,
        diff,
    })
}

/// Apply `patch` to the working tree at `dir`. A dry run (`git apply
/// --check`) runs first so a conflicting patch leaves the tree untouched.
pub async fn apply_patch(dir: &Path, patch: &str) -> Result<()> {
    run_git_with_input(dir, &["apply", "--check", "-"], patch).await?;
    run_git_with_input(dir, &["apply", "-"], patch).await?;
    Ok(())
}
