//! Tool definitions offered to the model and dispatch of tool calls to the
//! built-in implementations.

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use tokio_util::sync::CancellationToken;
use sc_domain::config::Config;
use sc_domain::tool::{BuiltinTool, ToolCall, ToolDefinition};
use sc_tools::exec::{self, BashRequest};
use sc_tools::file_ops::{self, EditRequest, ListRequest, ReadRequest, SearchRequest, WriteRequest};
use sc_tools::job_tools::{self, JobCancelRequest, JobOutputRequest};
use sc_tools::JobManager;

/// What a tool call needs from the session: the workspace it is confined
/// to, the job manager behind Bash and the active tool settings.
#[derive(Clone)]
pub struct ToolEnv {
    pub workspace_root: PathBuf,
    pub jobs: Arc<JobManager>,
    pub config: Arc<Config>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every built-in tool, before the permission context filters it.
pub fn build_tool_definitions() -> Vec<ToolDefinition> {
    BuiltinTool::ALL.into_iter().map(definition).collect()
}

fn definition(tool: BuiltinTool) -> ToolDefinition {
    let (description, parameters) = match tool {
        BuiltinTool::Read => (
            "Read a text file. Supports an optional line offset and limit.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Path relative to the workspace root" },
                    "offset": { "type": "integer", "description": "Line number to start from (0-indexed)" },
                    "limit": { "type": "integer", "description": "Maximum number of lines to return" }
                },
                "required": ["file_path"]
            }),
        ),
        BuiltinTool::Write => (
            "Create or overwrite a file with the given content.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Path relative to the workspace root" },
                    "content": { "type": "string", "description": "Full file content" }
                },
                "required": ["file_path", "content"]
            }),
        ),
        BuiltinTool::Edit => (
            "Replace an exact string in a file. The old string must occur exactly once unless replace_all is set.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Path relative to the workspace root" },
                    "old_string": { "type": "string", "description": "Text to replace" },
                    "new_string": { "type": "string", "description": "Replacement text" },
                    "replace_all": { "type": "boolean", "description": "Replace every occurrence" }
                },
                "required": ["file_path", "old_string", "new_string"]
            }),
        ),
        BuiltinTool::List => (
            "List a directory with sizes and modification times.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "dirpath": { "type": "string", "description": "Directory relative to the workspace root (default \".\")" },
                    "recursive": { "type": "boolean", "description": "Descend into subdirectories" }
                }
            }),
        ),
        BuiltinTool::Search => (
            "Search files for lines matching a regular expression.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regular expression" },
                    "path": { "type": "string", "description": "Directory or file to search (default \".\")" },
                    "case_insensitive": { "type": "boolean" },
                    "max_results": { "type": "integer", "description": "Maximum matches to return" }
                },
                "required": ["pattern"]
            }),
        ),
        BuiltinTool::Bash => (
            "Run a shell command in the workspace. Long-running commands continue as background jobs.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to execute" },
                    "background": { "type": "boolean", "description": "Start as a background job" },
                    "timeout_sec": { "type": "integer", "description": "Hard timeout in seconds" }
                },
                "required": ["command"]
            }),
        ),
        BuiltinTool::JobOutput => (
            "Get the status and output of a background job.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "job_id": { "type": "string", "description": "Job id returned by Bash" }
                },
                "required": ["job_id"]
            }),
        ),
        BuiltinTool::JobCancel => (
            "Cancel a running background job.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "job_id": { "type": "string", "description": "Job id returned by Bash" }
                },
                "required": ["job_id"]
            }),
        ),
    };
    ToolDefinition {
        name: tool.name().into(),
        description: description.into(),
        parameters,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dispatch a single tool call. Returns (result_content, is_error).
///
/// Permission has already been decided by the caller; this only runs the
/// tool. Unknown names (the model can hallucinate them) are an error result.
pub async fn dispatch_tool(env: &ToolEnv, call: &ToolCall, cancel: &CancellationToken) -> (String, bool) {
    let Some(tool) = BuiltinTool::from_name(&call.tool_name) else {
        return (format!("unknown tool '{}'", call.tool_name), true);
    };
    let root = env.workspace_root.as_path();
    let output = &env.config.tools.output;

    let result = match tool {
        BuiltinTool::Read => match parse::<ReadRequest>(tool, &call.arguments) {
            Ok(req) => file_ops::read(root, req).await,
            Err(e) => return (e, true),
        },
        BuiltinTool::Write => match parse::<WriteRequest>(tool, &call.arguments) {
            Ok(req) => file_ops::write(root, req).await,
            Err(e) => return (e, true),
        },
        BuiltinTool::Edit => match parse::<EditRequest>(tool, &call.arguments) {
            Ok(req) => file_ops::edit(root, req).await,
            Err(e) => return (e, true),
        },
        BuiltinTool::List => match parse::<ListRequest>(tool, &call.arguments) {
            Ok(req) => file_ops::list(root, req).await,
            Err(e) => return (e, true),
        },
        BuiltinTool::Search => match parse::<SearchRequest>(tool, &call.arguments) {
            Ok(req) => file_ops::search(root, req).await,
            Err(e) => return (e, true),
        },
        BuiltinTool::Bash => match parse::<BashRequest>(tool, &call.arguments) {
            Ok(req) => {
                if env.config.tools.exec_security.audit_log {
                    tracing::info!(command = %req.command, "bash tool invoked");
                }
                exec::bash(&env.jobs, root, req, output, cancel).await
            }
            Err(e) => return (e, true),
        },
        BuiltinTool::JobOutput => match parse::<JobOutputRequest>(tool, &call.arguments) {
            Ok(req) => job_tools::job_output(&env.jobs, req, output),
            Err(e) => return (e, true),
        },
        BuiltinTool::JobCancel => match parse::<JobCancelRequest>(tool, &call.arguments) {
            Ok(req) => job_tools::job_cancel(&env.jobs, req),
            Err(e) => return (e, true),
        },
    };

    match result {
        Ok(val) => (serde_json::to_string_pretty(&val).unwrap_or_default(), false),
        Err(e) => (serde_json::json!({ "error": e }).to_string(), true),
    }
}

fn parse<T: DeserializeOwned>(tool: BuiltinTool, arguments: &Value) -> Result<T, String> {
    T::deserialize(arguments).map_err(|e| format!("invalid {} arguments: {e}", tool.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_domain::config::ExecConfig;

    fn env(root: &std::path::Path) -> ToolEnv {
        ToolEnv {
            workspace_root: root.to_path_buf(),
            jobs: Arc::new(JobManager::new(ExecConfig::default())),
            config: Arc::new(Config::default()),
        }
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            call_id: "c1".into(),
            tool_name: name.into(),
            arguments,
        }
    }

    #[test]
    fn every_builtin_has_an_object_schema() {
        let defs = build_tool_definitions();
        assert_eq!(defs.len(), BuiltinTool::ALL.len());
        for def in &defs {
            assert_eq!(def.parameters["type"], "object", "{}", def.name);
            assert!(BuiltinTool::from_name(&def.name).is_some());
        }
    }

    #[tokio::test]
    async fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(dir.path());
        let cancel = CancellationToken::new();

        let (_, is_error) = dispatch_tool(
            &env,
            &call("Write", serde_json::json!({"file_path": "a.txt", "content": "hello\n"})),
            &cancel,
        )
        .await;
        assert!(!is_error);

        let (content, is_error) =
            dispatch_tool(&env, &call("Read", serde_json::json!({"file_path": "a.txt"})), &cancel).await;
        assert!(!is_error);
        assert!(content.contains("hello"));
    }

    #[tokio::test]
    async fn bad_arguments_are_an_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let (content, is_error) =
            dispatch_tool(&env(dir.path()), &call("Read", serde_json::json!({})), &CancellationToken::new()).await;
        assert!(is_error);
        assert!(content.starts_with("invalid Read arguments"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let (content, is_error) =
            dispatch_tool(&env(dir.path()), &call("Teleport", serde_json::json!({})), &CancellationToken::new()).await;
        assert!(is_error);
        assert!(content.contains("Teleport"));
    }

    #[tokio::test]
    async fn escaping_the_workspace_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (content, is_error) = dispatch_tool(
            &env(dir.path()),
            &call("Read", serde_json::json!({"file_path": "../outside"})),
            &CancellationToken::new(),
        )
        .await;
        assert!(is_error);
        assert!(content.contains("error"));
    }
}
