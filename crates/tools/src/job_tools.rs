//! JobOutput / JobCancel tools over the background job manager.

use serde::Deserialize;
use serde_json::Value;

use sc_domain::config::OutputConfig;

use crate::jobs::JobManager;
use crate::truncate::truncate_output_from_start;

#[derive(Debug, Clone, Deserialize)]
pub struct JobOutputRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobCancelRequest {
    pub job_id: String,
}

/// Current status and (truncated) output of a job.
pub fn job_output(
    manager: &JobManager,
    req: JobOutputRequest,
    output: &OutputConfig,
) -> Result<Value, String> {
    let snap = manager
        .poll(&req.job_id)
        .ok_or_else(|| format!("job '{}' not found", req.job_id))?;
    let text = truncate_output_from_start(&snap.output, output.max_lines, output.max_chars).output;

    let mut out = serde_json::json!({
        "job_id": snap.id,
        "command": snap.command,
        "status": snap.status,
        "output": text,
    });
    if let Some(code) = snap.exit_code {
        out["exit_code"] = code.into();
    }
    if let Some(err) = snap.error {
        out["error"] = err.into();
    }
    if let Some(end) = snap.end_time {
        let secs = end.signed_duration_since(snap.start_time).num_milliseconds() as f64 / 1000.0;
        out["duration_sec"] = secs.into();
    }
    Ok(out)
}

pub fn job_cancel(manager: &JobManager, req: JobCancelRequest) -> Result<Value, String> {
    let snap = manager
        .poll(&req.job_id)
        .ok_or_else(|| format!("job '{}' not found", req.job_id))?;
    if snap.status.is_terminal() {
        return Err(format!(
            "job '{}' already finished ({})",
            req.job_id,
            serde_json::to_value(snap.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default()
        ));
    }
    if !manager.cancel(&req.job_id) {
        return Err(format!("job '{}' could not be cancelled", req.job_id));
    }
    Ok(serde_json::json!({ "job_id": req.job_id, "cancelled": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use sc_domain::config::ExecConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn output_reports_completed_job() {
        let m = JobManager::new(ExecConfig::default());
        let id = m.start("echo done", None);
        m.wait(&id, Duration::from_secs(5)).await.unwrap();

        let out = job_output(&m, JobOutputRequest { job_id: id }, &OutputConfig::default()).unwrap();
        assert_eq!(out["status"], "completed");
        assert_eq!(out["exit_code"], 0);
        assert_eq!(out["output"].as_str().unwrap().trim(), "done");
    }

    #[tokio::test]
    async fn cancel_running_then_refuse_finished() {
        let m = JobManager::new(ExecConfig::default());
        let id = m.start("sleep 30", None);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let out = job_cancel(&m, JobCancelRequest { job_id: id.clone() }).unwrap();
        assert_eq!(out["cancelled"], true);
        let snap = m.wait(&id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(snap.status, JobStatus::Cancelled);

        let err = job_cancel(&m, JobCancelRequest { job_id: id }).unwrap_err();
        assert!(err.contains("already finished (cancelled)"));
    }

    #[test]
    fn unknown_job_is_an_error() {
        let m = JobManager::new(ExecConfig::default());
        let err = job_output(&m, JobOutputRequest { job_id: "x".into() }, &OutputConfig::default()).unwrap_err();
        assert!(err.contains("not found"));
    }
}
