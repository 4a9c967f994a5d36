//! The single user prompt a worker runs its agent loop on.

use sc_tools::truncate::truncate_tail_notice;

use crate::agents::AgentSource;
use crate::git::DiffContext;
use crate::protocol::WorkerKind;

/// Changed-file names listed before the rest are summarized as a count.
const MAX_LISTED_FILES: usize = 200;

pub fn build_worker_prompt(
    kind: WorkerKind,
    agent: &AgentSource,
    ctx: &DiffContext,
    max_diff_chars: usize,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# Agent: {}\n\n", agent.name));
    prompt.push_str(agent.instructions.trim());
    prompt.push_str("\n\n");

    prompt.push_str(&format!(
        "## Changes under review\n\nBase: {} ({} changed files)\n\n",
        ctx.base_branch,
        ctx.changed_files.len()
    ));
    for file in ctx.changed_files.iter().take(MAX_LISTED_FILES) {
        prompt.push_str(&format!("- {file}\n"));
    }
    if ctx.changed_files.len() > MAX_LISTED_FILES {
        prompt.push_str(&format!(
            "- ... and {} more\n",
            ctx.changed_files.len() - MAX_LISTED_FILES
        ));
    }

    prompt.push_str("\n```diff\n");
    prompt.push_str(&truncate_tail_notice(&ctx.diff, max_diff_chars, "diff"));
    prompt.push_str("\n```\n\n");

    prompt.push_str(match kind {
        WorkerKind::Check => {
            "Apply the instructions above to these changes. If something needs fixing, \
             edit the files directly in the working tree; your edits become a patch. \
             If nothing needs fixing, make no changes. Finish with a short summary."
        }
        WorkerKind::Review => {
            "Review these changes according to the instructions above. Do not modify \
             any files. Report each finding with its file and a short explanation, \
             or say that you found nothing."
        }
    });
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentSource {
        AgentSource {
            name: "lint".into(),
            description: None,
            instructions: "Remove debug prints.".into(),
            path: None,
        }
    }

    fn ctx(diff: &str, files: usize) -> DiffContext {
        DiffContext {
            base_branch: "main".into(),
            merge_base: "abc".into(),
            changed_files: (0..files).map(|i| format!("src/f{i}.rs")).collect(),
            diff: diff.into(),
        }
    }

    #[test]
    fn includes_instructions_files_and_diff() {
        let p = build_worker_prompt(WorkerKind::Check, &agent(), &ctx("+println!()", 2), 1000);
        assert!(p.contains("Remove debug prints."));
        assert!(p.contains("- src/f1.rs"));
        assert!(p.contains("+println!()"));
        assert!(p.contains("edit the files directly"));
    }

    #[test]
    fn large_diff_is_truncated_with_notice() {
        let diff = "x".repeat(500);
        let p = build_worker_prompt(WorkerKind::Review, &agent(), &ctx(&diff, 1), 100);
        assert!(p.contains("[diff truncated: showing 100 of 500 characters]"));
        assert!(p.contains("Do not modify"));
    }

    #[test]
    fn long_file_lists_are_summarized() {
        let p = build_worker_prompt(WorkerKind::Check, &agent(), &ctx("", MAX_LISTED_FILES + 5), 100);
        assert!(p.contains("... and 5 more"));
    }
}
