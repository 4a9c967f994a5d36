use std::path::Path;

use sc_domain::config::{Config, ConfigError, ConfigSeverity};
use sc_permissions::pattern::policy_from_pattern;
use sc_permissions::{Permission, PolicyFile};

use crate::services::policy_file_path;

/// Validate the config plus what it points at: permission patterns in the
/// config lists, the persisted policy file and the provider script.
fn collect_issues(config: &Config) -> Vec<ConfigError> {
    let mut issues = config.validate();

    let lists = [
        ("permissions.allow", &config.permissions.allow, Permission::Allow),
        ("permissions.ask", &config.permissions.ask, Permission::Ask),
        ("permissions.exclude", &config.permissions.exclude, Permission::Exclude),
    ];
    for (field, patterns, permission) in lists {
        for (i, pattern) in patterns.iter().enumerate() {
            if let Err(e) = policy_from_pattern(pattern, permission) {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("{field}[{i}]"),
                    message: e.to_string(),
                });
            }
        }
    }

    let policy_path = policy_file_path(config);
    if let Err(e) = PolicyFile::load(&policy_path) {
        issues.push(ConfigError {
            severity: ConfigSeverity::Error,
            field: "permissions.policy_file".into(),
            message: format!("{}: {e}", policy_path.display()),
        });
    }

    if let Some(script) = &config.llm.script_path {
        if !script.exists() {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.script_path".into(),
                message: format!("{} does not exist", script.display()),
            });
        }
    }

    issues
}

/// Parse and validate the config, printing any issues.
///
/// Returns `true` when no error-severity issue was found.
pub fn validate(config: &Config, config_path: &Path) -> bool {
    let issues = collect_issues(config);
    let config_path = config_path.display();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Dump the resolved config (defaults and command-line overrides applied)
/// as TOML.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("serializing config: {e}"))?;
    print!("{output}");
    Ok(())
}
