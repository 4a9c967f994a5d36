//! Parent side: one worktree and one child process per task.
//!
//! The child is the same executable started with a hidden flag. A task's
//! outcome is always a [`WorkerResult`]; spawn failures, protocol errors,
//! timeouts and crashes are folded into its `error` so one bad worker never
//! takes down its siblings.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Semaphore;

use sc_domain::config::WorkerConfig;
use sc_domain::error::{Error, Result};

use crate::agents::AgentSource;
use crate::git::DiffContext;
use crate::protocol::{
    read_message, write_message, TaskStatus, WorkerMessage, WorkerOptions, WorkerResult,
    WorkerRunConfig,
};
use crate::worktree::Worktree;

/// Flag that turns the binary into a worker.
pub const INTERNAL_WORKER_FLAG: &str = "--internal-worker";

/// How long a child may linger after sending its result.
const EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub agent: AgentSource,
    pub diff_context: DiffContext,
    pub options: WorkerOptions,
}

pub struct Orchestrator {
    program: PathBuf,
    args: Vec<String>,
    repo: PathBuf,
    timeout: Duration,
    max_concurrency: usize,
}

impl Orchestrator {
    /// Workers run `program --internal-worker` against worktrees of `repo`.
    pub fn new(program: impl Into<PathBuf>, repo: impl Into<PathBuf>, config: &WorkerConfig) -> Self {
        Self {
            program: program.into(),
            args: vec![INTERNAL_WORKER_FLAG.to_owned()],
            repo: repo.into(),
            timeout: Duration::from_secs(config.timeout_sec),
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Replace the arguments passed to the worker program.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    /// Run one task in a fresh worktree and child process. The worktree is
    /// removed afterwards whatever happened.
    pub async fn run_isolated(&self, task: WorkerTask) -> WorkerResult {
        let started = Instant::now();
        let agent_name = task.agent.name.clone();

        let tree = match Worktree::create(&self.repo).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(agent = %agent_name, error = %e, "could not create worktree");
                return WorkerResult::failed(agent_name, e.to_string(), elapsed_ms(started));
            }
        };

        let config = WorkerRunConfig {
            agent: task.agent,
            worktree_path: tree.path().to_path_buf(),
            baseline: tree.baseline().to_owned(),
            diff_context: task.diff_context,
            options: task.options,
        };

        let mut result = match self.spawn_worker(tree.path()) {
            Ok(child) => self.drive(child, config).await,
            Err(e) => WorkerResult::failed(&agent_name, e.to_string(), 0),
        };

        tree.remove().await;

        if result.agent_name.is_empty() {
            result.agent_name = agent_name;
        }
        if result.error.is_some() && result.duration_ms == 0 {
            result.duration_ms = elapsed_ms(started);
        }
        tracing::info!(
            agent = %result.agent_name,
            status = ?result.status(),
            duration_ms = result.duration_ms,
            "worker finished"
        );
        result
    }

    /// Run every task. Concurrent by default, bounded by the concurrency
    /// limit; with `fail_fast` tasks run one at a time and stop after the
    /// first that does not pass. Results keep task order.
    pub async fn run_all(&self, tasks: Vec<WorkerTask>, fail_fast: bool) -> Vec<WorkerResult> {
        if fail_fast {
            let mut results = Vec::with_capacity(tasks.len());
            for task in tasks {
                let result = self.run_isolated(task).await;
                let stop = result.status() != TaskStatus::Pass;
                results.push(result);
                if stop {
                    break;
                }
            }
            return results;
        }

        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let runs = tasks.into_iter().map(|task| {
            let permits = permits.clone();
            async move {
                let agent = task.agent.name.clone();
                match permits.acquire_owned().await {
                    Ok(_permit) => self.run_isolated(task).await,
                    Err(e) => WorkerResult::failed(agent, e.to_string(), 0),
                }
            }
        });
        futures_util::future::join_all(runs).await
    }

    fn spawn_worker(&self, worktree: &Path) -> Result<Child> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(worktree)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Worker(format!("cannot start worker {}: {e}", self.program.display()))
            })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "worker_stderr", "{line}");
                }
            });
        }
        tracing::debug!(program = %self.program.display(), pid = ?child.id(), "worker spawned");
        Ok(child)
    }

    async fn drive(&self, mut child: Child, config: WorkerRunConfig) -> WorkerResult {
        let agent_name = config.agent.name.clone();

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return WorkerResult::failed(agent_name, "worker stdio unavailable", 0);
        };

        match tokio::time::timeout(self.timeout, exchange(stdin, stdout, config)).await {
            Ok(Ok(Some(result))) => {
                if tokio::time::timeout(EXIT_GRACE, child.wait()).await.is_err() {
                    tracing::warn!(agent = %agent_name, "worker lingered after its result; killing");
                    kill_and_reap(&mut child).await;
                }
                result
            }
            Ok(Ok(None)) => {
                let message = match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                    Ok(Ok(status)) => match status.code() {
                        Some(code) if code != 0 => format!("Worker exited with code {code}"),
                        Some(_) => "Worker exited without sending a result".to_owned(),
                        None => format!("Worker terminated by signal ({status})"),
                    },
                    Ok(Err(e)) => format!("cannot wait for worker: {e}"),
                    Err(_) => {
                        kill_and_reap(&mut child).await;
                        "Worker closed its output without sending a result".to_owned()
                    }
                };
                WorkerResult::failed(agent_name, message, 0)
            }
            Ok(Err(e)) => {
                kill_and_reap(&mut child).await;
                WorkerResult::failed(agent_name, e.to_string(), 0)
            }
            Err(_) => {
                tracing::warn!(agent = %agent_name, timeout_sec = self.timeout.as_secs(), "worker timed out");
                kill_and_reap(&mut child).await;
                WorkerResult::failed(
                    agent_name,
                    format!("Worker timed out after {} seconds", self.timeout.as_secs()),
                    0,
                )
            }
        }
    }
}

/// Wait for `ready`, send the task, wait for the result. `Ok(None)` means
/// the worker closed its output first. The worker's stdin is closed on
/// return.
async fn exchange(
    mut stdin: ChildStdin,
    stdout: ChildStdout,
    config: WorkerRunConfig,
) -> Result<Option<WorkerResult>> {
    let mut stdout = BufReader::new(stdout);

    match read_message(&mut stdout).await? {
        Some(WorkerMessage::Ready) => {}
        Some(other) => return Err(Error::Worker(format!("expected ready, got {other:?}"))),
        None => return Ok(None),
    }

    // A worker that already died shows up as end of output below.
    if let Err(e) = write_message(&mut stdin, &WorkerMessage::Run { config }).await {
        tracing::debug!(error = %e, "could not send task to worker");
    }
    drop(stdin);

    loop {
        match read_message(&mut stdout).await? {
            Some(WorkerMessage::Result { result }) => return Ok(Some(result)),
            Some(other) => {
                tracing::debug!(message = ?other, "ignoring unexpected worker message");
            }
            None => return Ok(None),
        }
    }
}

async fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "worker kill failed");
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::test_repo::init;
    use crate::protocol::WorkerKind;

    fn task(name: &str) -> WorkerTask {
        WorkerTask {
            agent: AgentSource {
                name: name.into(),
                description: None,
                instructions: "check".into(),
                path: None,
            },
            diff_context: DiffContext::default(),
            options: WorkerOptions {
                kind: WorkerKind::Check,
                config_path: None,
                max_diff_chars: 1000,
            },
        }
    }

    /// A worker implemented as a shell script.
    fn scripted(repo: &Path, script: &str) -> Orchestrator {
        Orchestrator::new("sh", repo, &WorkerConfig::default())
            .with_args(vec!["-c".into(), script.into()])
    }

    const PASSING: &str = r#"printf '{"type":"ready"}\n'; read -r line; printf '{"type":"result","result":{"agent_name":"sh","agent_output":"ok","duration_ms":7}}\n'"#;

    #[tokio::test]
    async fn protocol_round_trip() {
        let repo = init();
        let result = scripted(repo.path(), PASSING).run_isolated(task("a")).await;
        assert_eq!(result.error, None);
        assert_eq!(result.agent_output, "ok");
        assert_eq!(result.duration_ms, 7);
        assert_eq!(result.status(), TaskStatus::Pass);
    }

    #[tokio::test]
    async fn nonzero_exit_without_result() {
        let repo = init();
        let result = scripted(repo.path(), "printf '{\"type\":\"ready\"}\\n'; exit 3")
            .run_isolated(task("a"))
            .await;
        assert_eq!(result.error.as_deref(), Some("Worker exited with code 3"));
        assert_eq!(result.agent_name, "a");
        assert_eq!(result.status(), TaskStatus::Error);
    }

    #[tokio::test]
    async fn hung_worker_times_out() {
        let repo = init();
        let started = Instant::now();
        let result = scripted(repo.path(), "sleep 30")
            .with_timeout(Duration::from_secs(1))
            .run_isolated(task("slow"))
            .await;
        assert_eq!(result.error.as_deref(), Some("Worker timed out after 1 seconds"));
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn missing_program_is_an_error_result() {
        let repo = init();
        let result = Orchestrator::new("/nonexistent/serialcode", repo.path(), &WorkerConfig::default())
            .run_isolated(task("a"))
            .await;
        assert!(result.error.unwrap().contains("cannot start worker"));
    }

    #[tokio::test]
    async fn worktrees_are_removed_after_each_task() {
        let repo = init();
        let orch = scripted(repo.path(), "exit 1");
        orch.run_all(vec![task("a"), task("b")], false).await;
        let list = crate::git::run_git(repo.path(), &["worktree", "list"]).await.unwrap();
        assert_eq!(list.lines().count(), 1);
    }

    #[tokio::test]
    async fn fail_fast_stops_after_first_failure() {
        let repo = init();
        let orch = scripted(repo.path(), "exit 2");
        let results = orch.run_all(vec![task("a"), task("b"), task("c")], true).await;
        assert_eq!(results.len(), 1);

        let all = orch.run_all(vec![task("a"), task("b"), task("c")], false).await;
        assert_eq!(all.len(), 3);
        let names: Vec<_> = all.iter().map(|r| r.agent_name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_siblings() {
        let repo = init();
        // Fails only for the agent named "bad".
        let script = r#"printf '{"type":"ready"}\n'; read -r line; case "$line" in *'"name":"bad"'*) exit 9;; esac; printf '{"type":"result","result":{"agent_name":"ok"}}\n'"#;
        let results = scripted(repo.path(), script)
            .with_max_concurrency(2)
            .run_all(vec![task("good"), task("bad"), task("fine")], false)
            .await;
        assert_eq!(results[0].status(), TaskStatus::Pass);
        assert_eq!(results[1].error.as_deref(), Some("Worker exited with code 9"));
        assert_eq!(results[2].status(), TaskStatus::Pass);
    }
}
