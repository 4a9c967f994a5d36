//! Tool pattern parsing and glob matching.
//!
//! A pattern is one of:
//! - an exact tool name (`Read`)
//! - a `*`-wildcard over tool names (`*`, `mcp__*`, `*File`)
//! - `Name(argPattern)`, which constrains the tool's default argument key
//!   (`Bash(git *)` constrains `command`, `Write(**/*.ts)` constrains
//!   `file_path`)
//!
//! Globs use `*` for any run of characters and `?` for exactly one; `**`
//! is accepted as a synonym of `*`. A backslash makes the next character
//! literal (`\*`, `\?`, `\(`, `\)`, `\\`) and escaped parentheses do not
//! count towards nesting. Everything else matches literally.

use regex::Regex;
use serde_json::Value;

use sc_domain::error::{Error, Result};
use sc_domain::tool::default_arg_key;

use crate::policy::{Permission, PermissionPolicy};

/// A pattern split into its tool part and optional argument glob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPattern {
    pub tool_name: String,
    pub arg_pattern: Option<String>,
}

fn pattern_error(pattern: &str, reason: &str) -> Error {
    Error::Pattern {
        pattern: pattern.to_owned(),
        reason: reason.to_owned(),
    }
}

/// Split `Name(argPattern)` into its parts.
///
/// Parentheses must balance and the argument section must close the
/// pattern; anything else is an error rather than a literal tool name.
pub fn parse_tool_pattern(pattern: &str) -> Result<ParsedPattern> {
    let pattern = pattern.trim();

    let mut depth: i32 = 0;
    let mut open = None;
    let mut last_close = None;
    let mut escaped = false;
    for (i, ch) in pattern.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '(' => {
                depth += 1;
                open.get_or_insert(i);
            }
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(pattern_error(pattern, "unmatched ')'"));
                }
                last_close = Some(i);
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(pattern_error(pattern, "unclosed '('"));
    }

    let Some(open) = open else {
        if pattern.is_empty() {
            return Err(pattern_error(pattern, "empty pattern"));
        }
        return Ok(ParsedPattern {
            tool_name: pattern.to_owned(),
            arg_pattern: None,
        });
    };

    if last_close != Some(pattern.len() - 1) {
        return Err(pattern_error(pattern, "unexpected text after ')'"));
    }
    let tool_name = pattern[..open].trim();
    if tool_name.is_empty() {
        return Err(pattern_error(pattern, "missing tool name before '('"));
    }
    let inner = &pattern[open + 1..pattern.len() - 1];
    if inner.trim().is_empty() {
        return Err(pattern_error(pattern, "empty argument pattern"));
    }

    Ok(ParsedPattern {
        tool_name: tool_name.to_owned(),
        arg_pattern: Some(inner.to_owned()),
    })
}

/// Escape `value` so it only matches itself as an argument glob.
pub fn escape_glob(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '*' | '?' | '(' | ')') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Build a policy from a user-facing pattern string.
pub fn policy_from_pattern(pattern: &str, permission: Permission) -> Result<PermissionPolicy> {
    let parsed = parse_tool_pattern(pattern)?;
    let policy = PermissionPolicy::new(parsed.tool_name.clone(), permission);
    Ok(match parsed.arg_pattern {
        Some(glob) => policy.with_argument(default_arg_key(&parsed.tool_name), glob),
        None => policy,
    })
}

/// Anchored regex source for a glob.
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    let mut literal = String::new();
    let mut chars = glob.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(".*");
            }
            '?' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push('.');
            }
            '\\' => literal.push(chars.next().unwrap_or('\\')),
            c => literal.push(c),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}

/// Whether `value` matches `glob` in full.
pub fn glob_matches(glob: &str, value: &str) -> bool {
    if !glob.contains(['*', '?', '\\']) {
        return glob == value;
    }
    // `(?s)` lets `*` run across newlines in multi-line commands.
    match Regex::new(&format!("(?s){}", glob_to_regex(glob))) {
        Ok(re) => re.is_match(value),
        Err(e) => {
            tracing::warn!(glob, error = %e, "glob failed to compile");
            false
        }
    }
}

/// Match a tool name against a tool pattern (exact or `*`-wildcard).
pub fn matches_tool_name(tool_name: &str, tool_pattern: &str) -> bool {
    if tool_pattern == "*" {
        return true;
    }
    if !tool_pattern.contains('*') {
        return tool_name == tool_pattern;
    }
    // Tool names never contain `?` wildcards; escape everything but `*`.
    let source = tool_pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{source}$"))
        .map(|re| re.is_match(tool_name))
        .unwrap_or(false)
}

/// Render an argument value as the string globs are matched against.
///
/// Strings match as-is, `null` as the empty string, arrays as their
/// comma-joined elements, other values as their JSON text.
pub fn stringify_arg(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(stringify_arg)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_and_wildcard_names() {
        let p = parse_tool_pattern("Read").unwrap();
        assert_eq!(p.tool_name, "Read");
        assert!(p.arg_pattern.is_none());

        let p = parse_tool_pattern("mcp__*").unwrap();
        assert_eq!(p.tool_name, "mcp__*");
    }

    #[test]
    fn name_with_argument() {
        let p = parse_tool_pattern("Write(**/*.ts)").unwrap();
        assert_eq!(p.tool_name, "Write");
        assert_eq!(p.arg_pattern.as_deref(), Some("**/*.ts"));
    }

    #[test]
    fn nested_balanced_parens_stay_in_argument() {
        let p = parse_tool_pattern("Bash(echo (hi))").unwrap();
        assert_eq!(p.tool_name, "Bash");
        assert_eq!(p.arg_pattern.as_deref(), Some("echo (hi)"));
    }

    #[test]
    fn unbalanced_parens_are_errors() {
        for bad in ["Bash(ls", "Bash ls)", "Write((a)", "Read)("] {
            let err = parse_tool_pattern(bad).unwrap_err();
            assert!(matches!(err, Error::Pattern { .. }), "{bad} should fail");
        }
    }

    #[test]
    fn malformed_argument_sections_are_errors() {
        assert!(parse_tool_pattern("(ls)").is_err());
        assert!(parse_tool_pattern("Bash()").is_err());
        assert!(parse_tool_pattern("Bash(ls) extra").is_err());
        assert!(parse_tool_pattern("   ").is_err());
    }

    #[test]
    fn policy_uses_tool_default_key() {
        let p = policy_from_pattern("Bash(git *)", Permission::Allow).unwrap();
        let args = p.argument_matches.unwrap();
        assert_eq!(args.get("command").map(String::as_str), Some("git *"));

        let p = policy_from_pattern("Write(src/**)", Permission::Ask).unwrap();
        assert!(p.argument_matches.unwrap().contains_key("file_path"));

        let p = policy_from_pattern("custom_tool(foo*)", Permission::Ask).unwrap();
        assert!(p.argument_matches.unwrap().contains_key("pattern"));
    }

    #[test]
    fn tool_name_wildcards() {
        assert!(matches_tool_name("anything", "*"));
        assert!(matches_tool_name("external_fs_read", "external_*"));
        assert!(!matches_tool_name("builtin_read", "external_*"));
        assert!(matches_tool_name("readFile", "*File"));
        assert!(matches_tool_name("test_x_123", "test_*_123"));
        assert!(!matches_tool_name("test_x_456", "test_*_123"));
        assert!(matches_tool_name("", ""));
        assert!(!matches_tool_name("tool", ""));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        assert!(matches_tool_name("test.file", "test.file"));
        assert!(!matches_tool_name("test_file", "test.file"));
        assert!(matches_tool_name("test[abc].txt", "test[abc].*"));
        assert!(!matches_tool_name("test[abc]_file", "test[abc].*"));
        assert!(matches_tool_name("tool+plus_extra", "tool+plus*"));
    }

    #[test]
    fn argument_globs() {
        let cmd = "cd ../projects && ls";
        assert!(glob_matches("cd*", cmd));
        assert!(glob_matches("*ls", cmd));
        assert!(glob_matches("*&&*", cmd));
        assert!(!glob_matches("pwd*", cmd));

        assert!(glob_matches("*.ts", "/src/file.ts"));
        assert!(glob_matches("/src/*", "/src/file.ts"));
        assert!(glob_matches("**/file.ts", "/src/file.ts"));
        assert!(!glob_matches("*.js", "/src/file.ts"));

        assert!(glob_matches("git a?d", "git add"));
        assert!(!glob_matches("git a??d", "git add"));
        assert!(glob_matches("ls", "ls"));
        assert!(!glob_matches("ls", "ls -la"));
    }

    #[test]
    fn glob_escapes_literals() {
        assert!(glob_matches("file(*).txt", "file(1).txt"));
        assert!(glob_matches("test*", "test[0-9]+"));
        assert!(glob_matches("*'test.pattern'*", "echo 'test.pattern'"));
        assert!(!glob_matches("*'test.pattern'*", "echo 'testXpattern'"));
    }

    #[test]
    fn escaped_parens_do_not_nest() {
        let p = parse_tool_pattern(r"Bash(echo '\)')").unwrap();
        assert_eq!(p.tool_name, "Bash");
        assert_eq!(p.arg_pattern.as_deref(), Some(r"echo '\)'"));

        assert!(parse_tool_pattern(r"Bash(ls\)").is_err());
        assert!(parse_tool_pattern(r"Bash\(ls)").is_err());
    }

    #[test]
    fn escaped_globs_match_literally() {
        assert!(glob_matches(r"ls \*.rs", "ls *.rs"));
        assert!(!glob_matches(r"ls \*.rs", "ls main.rs"));
        assert!(!glob_matches(r"ls \*.rs", "ls x; rm -rf ~; echo .rs"));
        assert!(glob_matches(r"git a\?d", "git a?d"));
        assert!(!glob_matches(r"git a\?d", "git add"));
        assert!(glob_matches(r"echo a\\b", r"echo a\b"));
        assert!(glob_matches(r"grep \*TODO*", "grep *TODO src/"));
    }

    #[test]
    fn escaped_commands_round_trip_through_policies() {
        for command in ["ls *.rs", "echo ')'", r"printf 'a\n' | wc -l", "f() { echo (x; }", "which ?"] {
            let pattern = format!("Bash({})", escape_glob(command));
            let policy = policy_from_pattern(&pattern, Permission::Allow)
                .unwrap_or_else(|e| panic!("{command}: {e}"));
            let glob = policy.argument_matches.unwrap()["command"].clone();
            assert!(glob_matches(&glob, command), "{command} should match itself");
            assert!(!glob_matches(&glob, &format!("{command}; rm -rf ~")));
        }
    }

    #[test]
    fn stringified_values() {
        assert_eq!(stringify_arg(&json!(null)), "");
        assert_eq!(stringify_arg(&json!(3000)), "3000");
        assert_eq!(stringify_arg(&json!(true)), "true");
        assert_eq!(stringify_arg(&json!(["a", "b", "c"])), "a,b,c");
    }
}
