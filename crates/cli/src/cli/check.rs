//! `serialcode check` / `serialcode review`: run agents against the
//! current changes in isolated worktrees.
//!
//! Each agent gets its own worktree and worker process. A check agent
//! passes when it leaves the tree untouched; edits come back as a patch
//! that `--fix` applies to the real working tree.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use sc_domain::config::Config;
use sc_worker::agents::resolve_agents;
use sc_worker::git::{apply_patch, compute_diff_context, repo_root};
use sc_worker::{Orchestrator, TaskStatus, WorkerKind, WorkerOptions, WorkerResult, WorkerTask};

use super::CheckArgs;

#[derive(Debug, Serialize)]
struct ReportEntry<'a> {
    agent: &'a str,
    status: TaskStatus,
    duration_ms: u64,
    #[serde(skip_serializing_if = "str::is_empty")]
    output: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    patch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
struct Summary {
    pass: usize,
    fail: usize,
    error: usize,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    kind: WorkerKind,
    base: &'a str,
    changed_files: &'a [String],
    results: Vec<ReportEntry<'a>>,
    summary: Summary,
    #[serde(skip_serializing_if = "Option::is_none")]
    fixes_applied: Option<usize>,
}

/// Run the agents and print the report. Returns the exit code: 1 when an
/// agent errored or found problems that were not fixed.
pub async fn check(config: &Config, config_path: &Path, args: CheckArgs, kind: WorkerKind) -> anyhow::Result<i32> {
    if args.fix && kind == WorkerKind::Review {
        anyhow::bail!("--fix only applies to `check`; review agents do not edit files");
    }

    let cwd = std::env::current_dir()?;
    let repo = repo_root(&cwd).await?;
    let diff = compute_diff_context(&repo, args.base.as_deref()).await?;
    if diff.is_empty() {
        eprintln!("No changes against {}; nothing to check.", diff.base_branch);
        return Ok(0);
    }

    let agents_dir = if config.worker.agents_dir.is_absolute() {
        config.worker.agents_dir.clone()
    } else {
        repo.join(&config.worker.agents_dir)
    };
    let agents = resolve_agents(&agents_dir, &args.agents)?;
    if agents.is_empty() {
        eprintln!(
            "No agents found in {}. Add a markdown file per agent or pass --agent <path>.",
            agents_dir.display()
        );
        return Ok(0);
    }

    let options = WorkerOptions {
        kind,
        config_path: std::fs::canonicalize(config_path).ok(),
        max_diff_chars: config.worker.max_diff_chars,
    };
    let tasks: Vec<WorkerTask> = agents
        .into_iter()
        .map(|agent| WorkerTask {
            agent,
            diff_context: diff.clone(),
            options: options.clone(),
        })
        .collect();

    let mut orchestrator = Orchestrator::new(std::env::current_exe()?, &repo, &config.worker);
    if let Some(n) = args.workers {
        orchestrator = orchestrator.with_max_concurrency(n);
    }
    if let Some(secs) = args.timeout {
        orchestrator = orchestrator.with_timeout(Duration::from_secs(secs));
    }

    eprintln!(
        "Running {} agent(s) against {} ({} changed file(s))…",
        tasks.len(),
        diff.base_branch,
        diff.changed_files.len()
    );
    let results = orchestrator.run_all(tasks, args.fail_fast).await;

    let fixes_applied = if args.fix {
        Some(apply_fixes(&repo, &results).await)
    } else {
        None
    };

    let report = Report {
        kind,
        base: &diff.base_branch,
        changed_files: &diff.changed_files,
        results: results.iter().map(entry).collect(),
        summary: summarize(&results),
        fixes_applied,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, kind);
    }
    if args.patch {
        for result in results.iter().filter(|r| r.status() == TaskStatus::Fail) {
            print!("{}", ensure_newline(&result.patch));
        }
    }

    Ok(exit_code(&report.summary, fixes_applied.unwrap_or(0)))
}

fn entry(result: &WorkerResult) -> ReportEntry<'_> {
    ReportEntry {
        agent: &result.agent_name,
        status: result.status(),
        duration_ms: result.duration_ms,
        output: &result.agent_output,
        patch: &result.patch,
        error: result.error.as_deref(),
    }
}

fn summarize(results: &[WorkerResult]) -> Summary {
    let mut summary = Summary::default();
    for result in results {
        match result.status() {
            TaskStatus::Pass => summary.pass += 1,
            TaskStatus::Fail => summary.fail += 1,
            TaskStatus::Error => summary.error += 1,
        }
    }
    summary
}

fn exit_code(summary: &Summary, fixes_applied: usize) -> i32 {
    i32::from(summary.error > 0 || summary.fail > fixes_applied)
}

/// Apply every produced patch in order. A patch that no longer applies
/// (usually because an earlier one touched the same lines) is skipped.
async fn apply_fixes(repo: &Path, results: &[WorkerResult]) -> usize {
    let mut applied = 0;
    for result in results.iter().filter(|r| r.status() == TaskStatus::Fail) {
        match apply_patch(repo, &result.patch).await {
            Ok(()) => {
                applied += 1;
                tracing::info!(agent = %result.agent_name, "patch applied");
            }
            Err(e) => {
                eprintln!("\x1b[33mcould not apply {}'s patch: {e}\x1b[0m", result.agent_name);
            }
        }
    }
    applied
}

fn print_report(report: &Report<'_>, kind: WorkerKind) {
    for entry in &report.results {
        let (label, color) = match entry.status {
            TaskStatus::Pass => ("PASS ", "32"),
            TaskStatus::Fail => ("FAIL ", "33"),
            TaskStatus::Error => ("ERROR", "31"),
        };
        let secs = entry.duration_ms as f64 / 1000.0;
        match entry.error {
            Some(err) => eprintln!("\x1b[{color}m{label}\x1b[0m {}  ({secs:.1}s)  {err}", entry.agent),
            None if entry.status == TaskStatus::Fail => eprintln!(
                "\x1b[{color}m{label}\x1b[0m {}  ({secs:.1}s)  patch: {} line(s)",
                entry.agent,
                entry.patch.lines().count()
            ),
            None => eprintln!("\x1b[{color}m{label}\x1b[0m {}  ({secs:.1}s)", entry.agent),
        }

        // Review findings are the point; check output only matters when
        // something changed.
        let show_output = kind == WorkerKind::Review || entry.status != TaskStatus::Pass;
        if show_output && !entry.output.trim().is_empty() {
            for line in entry.output.trim().lines() {
                println!("    {line}");
            }
            println!();
        }
    }

    let s = &report.summary;
    eprintln!("\n{} passed, {} failed, {} errored", s.pass, s.fail, s.error);
    if let Some(n) = report.fixes_applied {
        eprintln!("{n} of {} patch(es) applied", s.fail);
    }
}

fn ensure_newline(patch: &str) -> String {
    if patch.ends_with('\n') {
        patch.to_owned()
    } else {
        format!("{patch}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, patch: &str, error: Option<&str>) -> WorkerResult {
        WorkerResult {
            agent_name: name.into(),
            patch: patch.into(),
            agent_output: String::new(),
            duration_ms: 10,
            error: error.map(str::to_owned),
        }
    }

    #[test]
    fn summary_counts_each_status() {
        let results = vec![
            result("a", "", None),
            result("b", "diff --git a/x b/x\n", None),
            result("c", "", Some("boom")),
        ];
        assert_eq!(
            summarize(&results),
            Summary {
                pass: 1,
                fail: 1,
                error: 1
            }
        );
    }

    #[test]
    fn fixed_failures_do_not_fail_the_run() {
        let summary = Summary {
            pass: 1,
            fail: 2,
            error: 0,
        };
        assert_eq!(exit_code(&summary, 0), 1);
        assert_eq!(exit_code(&summary, 1), 1);
        assert_eq!(exit_code(&summary, 2), 0);

        let errored = Summary {
            pass: 0,
            fail: 0,
            error: 1,
        };
        assert_eq!(exit_code(&errored, 0), 1);
    }

    #[test]
    fn report_serializes_statuses_lowercase() {
        let results = vec![result("lint", "", None)];
        let report = Report {
            kind: WorkerKind::Check,
            base: "main",
            changed_files: &[],
            results: results.iter().map(entry).collect(),
            summary: summarize(&results),
            fixes_applied: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][0]["status"], "pass");
        assert_eq!(json["kind"], "check");
        assert!(json["results"][0].get("patch").is_none());
    }
}
