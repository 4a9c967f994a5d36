//! Agent definitions: markdown files whose body is the agent's
//! instructions, with optional YAML front matter.
//!
//! ```text
//! ---
//! name: no-todo
//! description: Flags leftover TODO comments
//! ---
//! Look through the changed files for TODO comments ...
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sc_domain::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Split `---` front matter from the body. Unparseable front matter is
/// logged and the whole file is treated as the body.
fn split_front_matter(content: &str) -> (FrontMatter, &str) {
    let trimmed = content.trim_start();
    let Some(after_open) = trimmed.strip_prefix("---") else {
        return (FrontMatter::default(), content);
    };
    let Some(close) = after_open.find("\n---") else {
        return (FrontMatter::default(), content);
    };
    let yaml = &after_open[..close];
    let rest = &after_open[close + 4..];
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");

    match serde_yaml::from_str::<Option<FrontMatter>>(yaml) {
        Ok(fm) => (fm.unwrap_or_default(), body),
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse agent front matter");
            (FrontMatter::default(), content)
        }
    }
}

/// Build an agent from file content. `fallback_name` is used when the front
/// matter has no `name`.
pub fn parse_agent(fallback_name: &str, content: &str) -> AgentSource {
    let (fm, body) = split_front_matter(content);
    AgentSource {
        name: fm
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| fallback_name.to_owned()),
        description: fm.description,
        instructions: body.trim().to_owned(),
        path: None,
    }
}

pub fn load_agent(path: &Path) -> Result<AgentSource> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read agent {}: {e}", path.display())))?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "agent".into());
    let mut agent = parse_agent(&stem, &content);
    if agent.instructions.is_empty() {
        return Err(Error::Config(format!("agent {} has no instructions", path.display())));
    }
    agent.path = Some(path.to_path_buf());
    Ok(agent)
}

/// All `*.md` agents in `dir`, sorted by name. A missing directory yields
/// no agents; unreadable files are skipped with a warning.
pub fn discover_agents(dir: &Path) -> Result<Vec<AgentSource>> {
    let mut agents = Vec::new();
    if !dir.is_dir() {
        return Ok(agents);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        match load_agent(&path) {
            Ok(agent) => agents.push(agent),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping agent file");
            }
        }
    }
    agents.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(agents)
}

/// Resolve the agents to run. With no selection every discovered agent
/// runs; otherwise each selector is a path to a markdown file or the name
/// of a discovered agent.
pub fn resolve_agents(agents_dir: &Path, selected: &[String]) -> Result<Vec<AgentSource>> {
    let discovered = discover_agents(agents_dir)?;
    if selected.is_empty() {
        return Ok(discovered);
    }

    selected
        .iter()
        .map(|sel| {
            let as_path = Path::new(sel);
            if as_path.is_file() {
                return load_agent(as_path);
            }
            discovered
                .iter()
                .find(|a| a.name == *sel)
                .cloned()
                .ok_or_else(|| {
                    Error::Config(format!(
                        "unknown agent '{sel}' (looked in {})",
                        agents_dir.display()
                    ))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_matter_sets_name_and_description() {
        let a = parse_agent(
            "file",
            "---\nname: no-todo\ndescription: Flags TODOs\n---\nFind TODO comments.\n",
        );
        assert_eq!(a.name, "no-todo");
        assert_eq!(a.description.as_deref(), Some("Flags TODOs"));
        assert_eq!(a.instructions, "Find TODO comments.");
    }

    #[test]
    fn plain_markdown_uses_fallback_name() {
        let a = parse_agent("style", "# Style\nKeep lines short.");
        assert_eq!(a.name, "style");
        assert!(a.instructions.starts_with("# Style"));
    }

    #[test]
    fn broken_front_matter_keeps_whole_file() {
        let a = parse_agent("x", "---\nname: [unclosed\n---\nbody");
        assert_eq!(a.name, "x");
        assert!(a.instructions.contains("body"));
    }

    #[test]
    fn discovery_and_selection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.md"), "---\nname: beta\n---\nB").unwrap();
        std::fs::write(dir.path().join("a.md"), "A instructions").unwrap();
        std::fs::write(dir.path().join("ignore.txt"), "not an agent").unwrap();
        std::fs::write(dir.path().join("empty.md"), "---\nname: e\n---\n").unwrap();

        let all = resolve_agents(dir.path(), &[]).unwrap();
        let names: Vec<_> = all.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["a", "beta"]);

        let one = resolve_agents(dir.path(), &["beta".into()]).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].instructions, "B");

        let by_path = dir.path().join("a.md").to_string_lossy().into_owned();
        assert_eq!(resolve_agents(dir.path(), &[by_path]).unwrap()[0].name, "a");

        assert!(resolve_agents(dir.path(), &["missing".into()]).is_err());
    }

    #[test]
    fn missing_directory_has_no_agents() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_agents(&dir.path().join("nope")).unwrap().is_empty());
    }
}
