//! File tools (Read, Write, Edit, List, Search) constrained to a workspace root.
//!
//! Paths may be relative to the workspace root or absolute inside it.
//! Anything that resolves outside the root is rejected.
//!
//! All functions return `Result<Value, String>` with structured JSON results.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Directories never descended into by List (recursive) and Search.
const SKIPPED_DIRS: [&str; 4] = [".git", "node_modules", "target", ".serialcode"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct ReadRequest {
    pub file_path: String,
    /// Line number to start from (0-indexed).
    #[serde(default)]
    pub offset: Option<usize>,
    /// Maximum number of lines to return.
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteRequest {
    pub file_path: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditRequest {
    pub file_path: String,
    pub old_string: String,
    pub new_string: String,
    /// Replace every occurrence instead of requiring exactly one.
    #[serde(default)]
    pub replace_all: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListRequest {
    #[serde(default = "default_dot")]
    pub dirpath: String,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    /// Regular expression matched against each line.
    pub pattern: String,
    /// Directory (or file) to search in.
    #[serde(default = "default_dot")]
    pub path: String,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_dot() -> String {
    ".".into()
}

fn default_max_results() -> usize {
    100
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub modified: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub file: String,
    pub line: usize,
    pub text: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate and resolve a requested path within a workspace root.
///
/// 1. Rejects `..` components in the raw input.
/// 2. Joins relative paths onto the workspace root.
/// 3. Canonicalizes the longest existing prefix and checks the result is
///    still contained in the canonical root.
pub fn validate_path(workspace_root: &Path, requested: &str) -> Result<PathBuf, String> {
    let requested_path = Path::new(requested);

    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err("path must not contain '..' components".to_owned());
        }
    }

    let canonical_root = workspace_root
        .canonicalize()
        .map_err(|e| format!("cannot resolve workspace root '{}': {e}", workspace_root.display()))?;

    let candidate = if requested_path.is_absolute() {
        requested_path.to_path_buf()
    } else {
        canonical_root.join(requested_path)
    };

    let resolved = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| format!("cannot resolve path '{}': {e}", candidate.display()))?
    } else {
        // Walk up to the nearest existing ancestor.
        let mut existing = candidate.as_path();
        let mut tail_parts: Vec<&std::ffi::OsStr> = Vec::new();
        while !existing.exists() {
            match existing.parent() {
                Some(parent) => {
                    if let Some(file_name) = existing.file_name() {
                        tail_parts.push(file_name);
                    }
                    existing = parent;
                }
                None => break,
            }
        }
        let mut resolved = existing
            .canonicalize()
            .map_err(|e| format!("cannot resolve ancestor of '{}': {e}", candidate.display()))?;
        for part in tail_parts.into_iter().rev() {
            resolved.push(part);
        }
        resolved
    };

    if !resolved.starts_with(&canonical_root) {
        return Err(format!(
            "path '{}' resolves outside workspace root '{}'",
            requested,
            canonical_root.display()
        ));
    }

    Ok(resolved)
}

fn relative_display(root: &Path, path: &Path) -> String {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    path.strip_prefix(&root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool implementations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read file contents with optional line offset and limit.
pub async fn read(workspace_root: &Path, req: ReadRequest) -> Result<Value, String> {
    let path = validate_path(workspace_root, &req.file_path)?;

    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| format!("failed to read '{}': {e}", req.file_path))?;

    let lines: Vec<&str> = content.lines().collect();
    let total_lines = lines.len();
    let offset = req.offset.unwrap_or(0);
    let limit = req.limit.unwrap_or(total_lines.saturating_sub(offset));

    let selected: Vec<&str> = lines.into_iter().skip(offset).take(limit).collect();

    Ok(serde_json::json!({
        "file_path": req.file_path,
        "content": selected.join("\n"),
        "total_lines": total_lines,
        "offset": offset,
        "lines_returned": selected.len(),
    }))
}

/// Write/create a file atomically (uniquely named temp sibling, then rename).
pub async fn write(workspace_root: &Path, req: WriteRequest) -> Result<Value, String> {
    let path = validate_path(workspace_root, &req.file_path)?;
    let existed = path.exists();
    write_atomic(&path, &req.content).await?;

    Ok(serde_json::json!({
        "file_path": req.file_path,
        "bytes_written": req.content.len(),
        "created": !existed,
    }))
}

/// Replace `old_string` with `new_string`. Without `replace_all` the old
/// string must occur exactly once.
pub async fn edit(workspace_root: &Path, req: EditRequest) -> Result<Value, String> {
    if req.old_string.is_empty() {
        return Err("old_string must not be empty".into());
    }
    if req.old_string == req.new_string {
        return Err("old_string and new_string are identical".into());
    }

    let path = validate_path(workspace_root, &req.file_path)?;
    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| format!("failed to read '{}': {e}", req.file_path))?;

    let occurrences = content.matches(req.old_string.as_str()).count();
    let updated = match occurrences {
        0 => return Err(format!("old_string not found in '{}'", req.file_path)),
        1 => content.replacen(&req.old_string, &req.new_string, 1),
        _ if req.replace_all => content.replace(&req.old_string, &req.new_string),
        n => {
            return Err(format!(
                "old_string occurs {n} times in '{}'; add surrounding context or set replace_all",
                req.file_path
            ))
        }
    };

    write_atomic(&path, &updated).await?;

    Ok(serde_json::json!({
        "file_path": req.file_path,
        "replacements": occurrences,
    }))
}

/// List directory contents with metadata.
pub async fn list(workspace_root: &Path, req: ListRequest) -> Result<Value, String> {
    let path = validate_path(workspace_root, &req.dirpath)?;

    if req.recursive {
        let root = path.clone();
        let files = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            walk_files(&root, &mut out);
            out
        })
        .await
        .map_err(|e| format!("directory walk failed: {e}"))?;
        let names: Vec<String> = files.iter().map(|f| relative_display(&path, f)).collect();
        return Ok(serde_json::json!({
            "dirpath": req.dirpath,
            "files": names,
            "count": names.len(),
        }));
    }

    let mut read_dir = fs::read_dir(&path)
        .await
        .map_err(|e| format!("failed to read directory '{}': {e}", req.dirpath))?;

    let mut entries: Vec<DirEntry> = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| format!("failed to read directory entry: {e}"))?
    {
        let metadata = entry
            .metadata()
            .await
            .map_err(|e| format!("failed to read metadata for '{}': {e}", entry.path().display()))?;

        let modified = metadata
            .modified()
            .ok()
            .map(|t| {
                let dt: DateTime<Utc> = t.into();
                dt.to_rfc3339()
            })
            .unwrap_or_default();

        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            size: metadata.len(),
            modified,
            is_dir: metadata.is_dir(),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(serde_json::json!({
        "dirpath": req.dirpath,
        "entries": entries,
        "count": entries.len(),
    }))
}

/// Regex search over text files below `path`.
pub async fn search(workspace_root: &Path, req: SearchRequest) -> Result<Value, String> {
    let regex = RegexBuilder::new(&req.pattern)
        .case_insensitive(req.case_insensitive)
        .build()
        .map_err(|e| format!("invalid search pattern '{}': {e}", req.pattern))?;
    let base = validate_path(workspace_root, &req.path)?;
    let root = workspace_root.to_path_buf();
    let max = req.max_results.max(1);

    let (matches, truncated) = tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        if base.is_file() {
            files.push(base);
        } else {
            walk_files(&base, &mut files);
        }

        let mut matches = Vec::new();
        for file in files {
            // Binary and non-UTF-8 files are skipped.
            let Ok(content) = std::fs::read_to_string(&file) else {
                continue;
            };
            for (i, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    if matches.len() == max {
                        return (matches, true);
                    }
                    matches.push(SearchMatch {
                        file: relative_display(&root, &file),
                        line: i + 1,
                        text: line.trim_end().to_owned(),
                    });
                }
            }
        }
        (matches, false)
    })
    .await
    .map_err(|e| format!("search failed: {e}"))?;

    Ok(serde_json::json!({
        "pattern": req.pattern,
        "matches": matches,
        "count": matches.len(),
        "truncated": truncated,
    }))
}

// ── helpers ─────────────────────────────────────────────────────────

async fn write_atomic(path: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create parent directory: {e}"))?;
    }

    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        uuid::Uuid::new_v4().as_simple()
    );
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp_path)
        .await
        .map_err(|e| format!("failed to create temp file '{}': {e}", tmp_path.display()))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| format!("failed to write temp file: {e}"))?;
    file.flush()
        .await
        .map_err(|e| format!("failed to flush temp file: {e}"))?;
    file.sync_data()
        .await
        .map_err(|e| format!("failed to sync temp file: {e}"))?;
    drop(file);

    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(format!("failed to rename temp file into place: {e}"));
    }
    Ok(())
}

/// Depth-first file listing, sorted, skipping [`SKIPPED_DIRS`].
fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = read_dir.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            let name = entry.file_name();
            if SKIPPED_DIRS.iter().any(|s| name == *s) {
                continue;
            }
            walk_files(&path, out);
        } else if file_type.is_file() {
            out.push(path);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tmp_workspace() -> TempDir {
        TempDir::new().expect("failed to create temp dir")
    }

    #[test]
    fn validate_path_rejects_parent_traversal() {
        let ws = tmp_workspace();
        let err = validate_path(ws.path(), "../etc/passwd").unwrap_err();
        assert!(err.contains(".."));
    }

    #[test]
    fn validate_path_rejects_absolute_outside_root() {
        let ws = tmp_workspace();
        let err = validate_path(ws.path(), "/etc/passwd").unwrap_err();
        assert!(err.contains("outside workspace root"));
    }

    #[test]
    fn validate_path_accepts_absolute_inside_root() {
        let ws = tmp_workspace();
        std::fs::write(ws.path().join("a.txt"), "x").unwrap();
        let abs = ws.path().canonicalize().unwrap().join("a.txt");
        assert!(validate_path(ws.path(), abs.to_str().unwrap()).is_ok());
    }

    #[test]
    fn validate_path_accepts_nested_new_file() {
        let ws = tmp_workspace();
        std::fs::create_dir_all(ws.path().join("subdir")).unwrap();
        assert!(validate_path(ws.path(), "subdir/deeper/new_file.txt").is_ok());
    }

    #[tokio::test]
    async fn write_then_read_with_window() {
        let ws = tmp_workspace();
        let written = write(
            ws.path(),
            WriteRequest {
                file_path: "src/lines.txt".into(),
                content: "line0\nline1\nline2\nline3\n".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(written["created"], true);

        let result = read(
            ws.path(),
            ReadRequest {
                file_path: "src/lines.txt".into(),
                offset: Some(1),
                limit: Some(2),
            },
        )
        .await
        .unwrap();
        assert_eq!(result["content"], "line1\nline2");
        assert_eq!(result["total_lines"], 4);
    }

    #[tokio::test]
    async fn edit_requires_unique_match_unless_replace_all() {
        let ws = tmp_workspace();
        std::fs::write(ws.path().join("f.rs"), "let a = 1;\nlet b = 1;\n").unwrap();

        let ambiguous = edit(
            ws.path(),
            EditRequest {
                file_path: "f.rs".into(),
                old_string: "= 1".into(),
                new_string: "= 2".into(),
                replace_all: false,
            },
        )
        .await
        .unwrap_err();
        assert!(ambiguous.contains("occurs 2 times"));

        let unique = edit(
            ws.path(),
            EditRequest {
                file_path: "f.rs".into(),
                old_string: "let a = 1".into(),
                new_string: "let a = 3".into(),
                replace_all: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(unique["replacements"], 1);

        edit(
            ws.path(),
            EditRequest {
                file_path: "f.rs".into(),
                old_string: "let".into(),
                new_string: "const".into(),
                replace_all: true,
            },
        )
        .await
        .unwrap();
        let content = std::fs::read_to_string(ws.path().join("f.rs")).unwrap();
        assert_eq!(content, "const a = 3;\nconst b = 1;\n");
    }

    #[tokio::test]
    async fn edit_missing_string_is_an_error() {
        let ws = tmp_workspace();
        std::fs::write(ws.path().join("f.txt"), "abc").unwrap();
        let err = edit(
            ws.path(),
            EditRequest {
                file_path: "f.txt".into(),
                old_string: "zzz".into(),
                new_string: "y".into(),
                replace_all: false,
            },
        )
        .await
        .unwrap_err();
        assert!(err.contains("not found"));
    }

    #[tokio::test]
    async fn list_returns_sorted_entries() {
        let ws = tmp_workspace();
        std::fs::write(ws.path().join("b.txt"), "bb").unwrap();
        std::fs::write(ws.path().join("a.txt"), "aaa").unwrap();
        std::fs::create_dir(ws.path().join("subdir")).unwrap();

        let result = list(
            ws.path(),
            ListRequest {
                dirpath: ".".into(),
                recursive: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(result["count"], 3);
        let names: Vec<&str> = result["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "subdir"]);
    }

    #[tokio::test]
    async fn recursive_list_skips_git() {
        let ws = tmp_workspace();
        std::fs::create_dir_all(ws.path().join(".git/objects")).unwrap();
        std::fs::write(ws.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::create_dir_all(ws.path().join("src")).unwrap();
        std::fs::write(ws.path().join("src/main.rs"), "fn main() {}").unwrap();

        let result = list(
            ws.path(),
            ListRequest {
                dirpath: ".".into(),
                recursive: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(result["files"], serde_json::json!(["src/main.rs"]));
    }

    #[tokio::test]
    async fn search_finds_matching_lines() {
        let ws = tmp_workspace();
        std::fs::create_dir_all(ws.path().join("src")).unwrap();
        std::fs::write(ws.path().join("src/a.rs"), "fn alpha() {}\nfn beta() {}\n").unwrap();
        std::fs::write(ws.path().join("src/b.rs"), "// TODO: Alpha\n").unwrap();

        let result = search(
            ws.path(),
            SearchRequest {
                pattern: "alpha".into(),
                path: ".".into(),
                case_insensitive: true,
                max_results: 10,
            },
        )
        .await
        .unwrap();
        assert_eq!(result["count"], 2);
        assert_eq!(result["matches"][0]["file"], "src/a.rs");
        assert_eq!(result["matches"][0]["line"], 1);
        assert_eq!(result["matches"][1]["file"], "src/b.rs");
        assert_eq!(result["truncated"], false);
    }

    #[tokio::test]
    async fn search_caps_results_and_rejects_bad_regex() {
        let ws = tmp_workspace();
        std::fs::write(ws.path().join("x.txt"), "a\na\na\n").unwrap();
        let capped = search(
            ws.path(),
            SearchRequest {
                pattern: "a".into(),
                path: ".".into(),
                case_insensitive: false,
                max_results: 2,
            },
        )
        .await
        .unwrap();
        assert_eq!(capped["count"], 2);
        assert_eq!(capped["truncated"], true);

        let bad = search(
            ws.path(),
            SearchRequest {
                pattern: "(".into(),
                path: ".".into(),
                case_insensitive: false,
                max_results: 2,
            },
        )
        .await
        .unwrap_err();
        assert!(bad.contains("invalid search pattern"));
    }
}
