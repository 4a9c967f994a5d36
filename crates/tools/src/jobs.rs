//! Background job manager.
//!
//! Tracks shell commands started by the Bash tool. Each job is owned by a
//! monitor task that spawns the child, collects its output and records the
//! outcome; the manager only reads job state and forwards cancel requests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use sc_domain::config::ExecConfig;

/// How long to keep reading pipes after the child exits.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    /// The process exited on its own; `exit_code` says how.
    Completed,
    /// Spawn failure, timeout, idle timeout or death by signal.
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// Combined stdout/stderr with a size cap. When the cap is exceeded the
/// oldest quarter is dropped.
pub struct OutputBuffer {
    combined: String,
    max_chars: usize,
}

impl OutputBuffer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            combined: String::new(),
            max_chars,
        }
    }

    pub fn push(&mut self, text: &str) {
        self.combined.push_str(text);
        if self.combined.len() > self.max_chars {
            let keep = self.max_chars * 3 / 4;
            let mut boundary = self.combined.len() - keep;
            while boundary < self.combined.len() && !self.combined.is_char_boundary(boundary) {
                boundary += 1;
            }
            self.combined.drain(..boundary);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.combined
    }

    pub fn len(&self) -> usize {
        self.combined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }

    pub fn tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.combined.lines().collect();
        if all.len() <= lines {
            self.combined.clone()
        } else {
            all[all.len() - lines..].join("\n")
        }
    }
}

struct BackgroundJob {
    id: String,
    command: String,
    workdir: Option<PathBuf>,
    status: JobStatus,
    output: OutputBuffer,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    error: Option<String>,
}

struct JobHandle {
    job: Arc<RwLock<BackgroundJob>>,
    kill_tx: mpsc::Sender<()>,
    done_rx: watch::Receiver<bool>,
}

/// Point-in-time copy of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub command: String,
    pub status: JobStatus,
    pub output: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary row for `list`.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub command: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub output_chars: usize,
}

impl BackgroundJob {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            command: self.command.clone(),
            status: self.status,
            output: self.output.as_str().to_owned(),
            start_time: self.start_time,
            end_time: self.end_time,
            exit_code: self.exit_code,
            error: self.error.clone(),
        }
    }

    fn finish(&mut self, status: JobStatus, exit_code: Option<i32>, error: Option<String>) {
        self.status = status;
        self.exit_code = exit_code;
        self.error = error;
        self.end_time = Some(Utc::now());
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JobManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory registry of running and recently finished jobs.
pub struct JobManager {
    jobs: RwLock<HashMap<String, JobHandle>>,
    config: ExecConfig,
}

impl JobManager {
    pub fn new(config: ExecConfig) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Start `command` under `sh -c`. The job is registered as `Pending` and
    /// moves to `Running` once its process has been spawned.
    pub fn start(&self, command: &str, workdir: Option<&Path>) -> String {
        self.start_with_timeout(command, workdir, None)
    }

    pub fn start_with_timeout(
        &self,
        command: &str,
        workdir: Option<&Path>,
        timeout_sec: Option<u64>,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let job = Arc::new(RwLock::new(BackgroundJob {
            id: id.clone(),
            command: command.to_owned(),
            workdir: workdir.map(Path::to_path_buf),
            status: JobStatus::Pending,
            output: OutputBuffer::new(self.config.max_output_chars),
            start_time: Utc::now(),
            end_time: None,
            exit_code: None,
            error: None,
        }));
        let (kill_tx, kill_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = watch::channel(false);

        self.jobs.write().insert(
            id.clone(),
            JobHandle {
                job: Arc::clone(&job),
                kill_tx,
                done_rx,
            },
        );

        let limits = Limits {
            timeout: Duration::from_secs(timeout_sec.unwrap_or(self.config.timeout_sec)),
            idle: match self.config.idle_timeout_sec {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        };
        tokio::spawn(monitor(job, kill_rx, done_tx, limits));
        tracing::debug!(job_id = %id, command = %command, "job started");
        id
    }

    pub fn poll(&self, id: &str) -> Option<JobSnapshot> {
        self.jobs.read().get(id).map(|h| h.job.read().snapshot())
    }

    /// Wait until the job finishes or `timeout` elapses, then snapshot it.
    pub async fn wait(&self, id: &str, timeout: Duration) -> Option<JobSnapshot> {
        let mut done_rx = self.jobs.read().get(id)?.done_rx.clone();
        let _ = tokio::time::timeout(timeout, done_rx.wait_for(|done| *done)).await;
        self.poll(id)
    }

    /// Ask a job's monitor to kill it. Returns false when the job is unknown
    /// or already finished.
    pub fn cancel(&self, id: &str) -> bool {
        let jobs = self.jobs.read();
        let Some(handle) = jobs.get(id) else {
            return false;
        };
        if handle.job.read().status.is_terminal() {
            return false;
        }
        let sent = handle.kill_tx.try_send(()).is_ok();
        if sent {
            tracing::info!(job_id = %id, "job cancel requested");
        }
        sent
    }

    pub fn list(&self) -> Vec<JobInfo> {
        let mut out: Vec<JobInfo> = self
            .jobs
            .read()
            .values()
            .map(|h| {
                let j = h.job.read();
                JobInfo {
                    id: j.id.clone(),
                    command: j.command.clone(),
                    status: j.status,
                    exit_code: j.exit_code,
                    start_time: j.start_time,
                    end_time: j.end_time,
                    output_chars: j.output.len(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        out
    }

    /// Forget a job, cancelling it first if it is still running.
    pub fn remove(&self, id: &str) -> bool {
        self.cancel(id);
        self.jobs.write().remove(id).is_some()
    }

    /// Drop finished jobs older than `cleanup_ms`.
    pub fn cleanup(&self) -> usize {
        let cutoff_ms = self.config.cleanup_ms as i64;
        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, h| match h.job.read().end_time {
            Some(end) => now.signed_duration_since(end).num_milliseconds() < cutoff_ms,
            None => true,
        });
        before - jobs.len()
    }

    /// Cancel every job that is still running.
    pub fn cancel_all(&self) {
        let ids: Vec<String> = self.jobs.read().keys().cloned().collect();
        for id in ids {
            self.cancel(&id);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Monitor task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Limits {
    timeout: Duration,
    idle: Option<Duration>,
}

async fn monitor(
    job: Arc<RwLock<BackgroundJob>>,
    mut kill_rx: mpsc::Receiver<()>,
    done_tx: watch::Sender<bool>,
    limits: Limits,
) {
    let (command, workdir) = {
        let j = job.read();
        (j.command.clone(), j.workdir.clone())
    };

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&command);
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);
    if let Some(dir) = &workdir {
        cmd.current_dir(dir);
    }

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            job.write()
                .finish(JobStatus::Failed, None, Some(format!("failed to spawn: {e}")));
            let _ = done_tx.send(true);
            return;
        }
    };
    job.write().status = JobStatus::Running;

    // Both pipes feed one channel so the idle timer sees every line.
    let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
    if let Some(stdout) = child.stdout.take() {
        let tx = line_tx.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let tx = line_tx.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(line_tx);

    let hard_deadline = tokio::time::sleep(limits.timeout);
    tokio::pin!(hard_deadline);

    loop {
        let idle = async {
            match limits.idle {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            Some(line) = line_rx.recv() => {
                let mut j = job.write();
                j.output.push(&line);
                j.output.push("\n");
            }
            result = child.wait() => {
                let drain = async {
                    while let Some(line) = line_rx.recv().await {
                        let mut j = job.write();
                        j.output.push(&line);
                        j.output.push("\n");
                    }
                };
                let _ = tokio::time::timeout(DRAIN_GRACE, drain).await;

                let mut j = job.write();
                match result {
                    Ok(status) => match status.code() {
                        Some(code) => j.finish(JobStatus::Completed, Some(code), None),
                        None => j.finish(JobStatus::Failed, None, Some("terminated by signal".into())),
                    },
                    Err(e) => j.finish(JobStatus::Failed, None, Some(format!("process error: {e}"))),
                }
                break;
            }
            Some(()) = kill_rx.recv() => {
                let _ = child.kill().await;
                let mut j = job.write();
                j.output.push("\n[cancelled]");
                j.finish(JobStatus::Cancelled, None, None);
                break;
            }
            _ = &mut hard_deadline => {
                let _ = child.kill().await;
                let secs = limits.timeout.as_secs();
                job.write().finish(
                    JobStatus::Failed,
                    None,
                    Some(format!("timed out after {secs} seconds")),
                );
                break;
            }
            _ = idle => {
                let _ = child.kill().await;
                let secs = limits.idle.map(|d| d.as_secs()).unwrap_or_default();
                job.write().finish(
                    JobStatus::Failed,
                    None,
                    Some(format!("terminated after {secs} seconds without output")),
                );
                break;
            }
        }
    }

    let _ = done_tx.send(true);
    let j = job.read();
    tracing::debug!(
        job_id = %j.id,
        status = ?j.status,
        exit_code = ?j.exit_code,
        "job monitor finished"
    );
}
