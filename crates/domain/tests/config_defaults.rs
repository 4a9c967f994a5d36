use sc_domain::config::{Config, ConfigSeverity, PermissionMode};

#[test]
fn default_mode_is_normal() {
    let config = Config::default();
    assert_eq!(config.permissions.mode, PermissionMode::Normal);
    assert!(config.permissions.use_defaults);
}

#[test]
fn empty_file_parses_to_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.agent.max_tool_loops, 25);
    assert_eq!(config.worker.timeout_sec, 300);
    assert_eq!(config.compaction.buffer_cap_tokens, 15_000);
}

#[test]
fn permission_lists_parse() {
    let toml_str = r#"
[permissions]
mode = "plan"
allow = ["Read", "Bash(git status*)"]
exclude = ["Write"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.permissions.mode, PermissionMode::Plan);
    assert_eq!(config.permissions.allow.len(), 2);
    assert_eq!(config.permissions.exclude, vec!["Write".to_string()]);
    assert!(config.permissions.ask.is_empty());
}

#[test]
fn retry_section_overrides_only_given_fields() {
    let toml_str = r#"
[retry]
max_retries = 7
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.retry.max_retries, 7);
    assert_eq!(config.retry.initial_delay_ms, 1000);
}

#[test]
fn output_reservation_larger_than_window_is_an_error() {
    let toml_str = r#"
[llm]
context_window_tokens = 8000
max_output_tokens = 8000
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|e| e.severity == ConfigSeverity::Error && e.field == "llm.max_output_tokens"));
    assert!(config.has_errors());
}

#[test]
fn default_config_only_warns() {
    let config = Config::default();
    assert!(!config.has_errors());
}

#[test]
fn mode_parses_case_insensitively() {
    assert_eq!("PLAN".parse::<PermissionMode>().unwrap(), PermissionMode::Plan);
    assert!("yolo".parse::<PermissionMode>().is_err());
}
