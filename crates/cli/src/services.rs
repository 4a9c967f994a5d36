//! Service registrations for an agent session.
//!
//! ```text
//! config ──┬── auth ── api_client ── model
//!          ├── tool_permissions
//!          └── jobs
//! ```
//!
//! Reloading `config` cascades to everything; "always allow" reloads only
//! `tool_permissions`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sc_domain::capability::{ModelInfo, DEFAULT_CONTEXT_WINDOW_TOKENS};
use sc_domain::config::{Config, PermissionMode};
use sc_domain::error::{Error, Result};
use sc_permissions::defaults::default_policies;
use sc_permissions::pattern::parse_tool_pattern;
use sc_permissions::precedence::policies_from_lists;
use sc_permissions::{resolve_precedence, CommandGuard, PermissionContext, PermissionPolicy, PolicyFile};
use sc_providers::{build_provider, resolve_credentials, Credentials, LlmProvider};
use sc_services::ServiceContainer;
use sc_tools::JobManager;

pub const CONFIG: &str = "config";
pub const AUTH: &str = "auth";
pub const API_CLIENT: &str = "api_client";
pub const MODEL: &str = "model";
pub const TOOL_PERMISSIONS: &str = "tool_permissions";
pub const JOBS: &str = "jobs";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config loading
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the `config` service reads from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A TOML file; a missing file means defaults.
    File(PathBuf),
    Fixed(Config),
}

impl ConfigSource {
    pub fn load(&self) -> Result<Config> {
        match self {
            ConfigSource::File(path) => load_config(path),
            ConfigSource::Fixed(config) => Ok(config.clone()),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(raw) => toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(Error::Config(format!("reading {}: {e}", path.display()))),
    }
}

/// Command-line settings layered over the loaded config.
#[derive(Debug, Clone, Default)]
pub struct SessionOverrides {
    pub mode: Option<PermissionMode>,
    pub allow: Vec<String>,
    pub ask: Vec<String>,
    pub exclude: Vec<String>,
    pub headless: bool,
    pub workspace_root: Option<PathBuf>,
    /// Extra regex deny-list entries for Bash commands.
    pub denied_commands: Vec<String>,
}

impl SessionOverrides {
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(mode) = self.mode {
            config.permissions.mode = mode;
        }
        if self.headless {
            config.agent.headless = true;
        }
        if let Some(root) = &self.workspace_root {
            config.agent.workspace_root = Some(root.clone());
        }
        config
            .tools
            .exec_security
            .denied_patterns
            .extend(self.denied_commands.iter().cloned());
        config
    }

    pub fn policies(&self) -> Result<Vec<PermissionPolicy>> {
        policies_from_lists(&self.allow, &self.ask, &self.exclude)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service values
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The `api_client` service: the configured provider behind the retry layer.
#[derive(Clone)]
pub struct ApiClient {
    provider: Arc<dyn LlmProvider>,
}

impl ApiClient {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.provider)
    }
}

/// Default location of the persisted allow/ask/exclude rules.
pub fn policy_file_path(config: &Config) -> PathBuf {
    config.permissions.policy_file.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("serialcode")
            .join("permissions.yaml")
    })
}

/// Resolve the permission context from config, the policy file and
/// command-line overrides.
pub fn build_permission_context(
    config: &Config,
    overrides: &[PermissionPolicy],
) -> Result<PermissionContext> {
    let perms = &config.permissions;
    let mut personal = PolicyFile::load(&policy_file_path(config))?.to_policies()?;
    personal.extend(policies_from_lists(&perms.allow, &perms.ask, &perms.exclude)?);

    let normal = resolve_precedence(&default_policies(), overrides, &personal, perms.use_defaults);
    let guard = CommandGuard::new(&config.tools.exec_security.denied_patterns)?;
    Ok(PermissionContext::new(perms.mode, normal, guard))
}

pub fn model_info(config: &Config, provider: &dyn LlmProvider) -> ModelInfo {
    let caps = provider.capabilities();
    ModelInfo {
        provider: provider.provider_id().to_owned(),
        name: config.llm.model.clone(),
        context_window_tokens: config
            .llm
            .context_window_tokens
            .or(caps.context_window_tokens)
            .unwrap_or(DEFAULT_CONTEXT_WINDOW_TOKENS),
        max_output_tokens: config.llm.max_output_tokens.or(caps.max_output_tokens),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn build_services(source: ConfigSource, overrides: SessionOverrides) -> Result<Arc<ServiceContainer>> {
    let override_policies = Arc::new(overrides.policies()?);
    let source = Arc::new(source);
    let overrides = Arc::new(overrides);
    let container = Arc::new(ServiceContainer::new());

    container.register::<Config, _, _>(CONFIG, &[], move |_deps| {
        let source = Arc::clone(&source);
        let overrides = Arc::clone(&overrides);
        async move { Ok(overrides.apply(source.load()?)) }
    });

    container.register::<Credentials, _, _>(AUTH, &[CONFIG], |deps| async move {
        let config = deps.get::<Config>(CONFIG)?;
        resolve_credentials(&config.llm)
    });

    container.register::<ApiClient, _, _>(API_CLIENT, &[AUTH, CONFIG], |deps| async move {
        let config = deps.get::<Config>(CONFIG)?;
        let credentials = deps.get::<Credentials>(AUTH)?;
        let provider = build_provider(&config.llm, &config.retry, &credentials)?;
        Ok(ApiClient::new(provider))
    });

    container.register::<ModelInfo, _, _>(MODEL, &[CONFIG, API_CLIENT], |deps| async move {
        let config = deps.get::<Config>(CONFIG)?;
        let client = deps.get::<ApiClient>(API_CLIENT)?;
        Ok(model_info(&config, client.provider().as_ref()))
    });

    container.register::<PermissionContext, _, _>(TOOL_PERMISSIONS, &[CONFIG], move |deps| {
        let override_policies = Arc::clone(&override_policies);
        async move {
            let config = deps.get::<Config>(CONFIG)?;
            build_permission_context(&config, &override_policies)
        }
    });

    container.register::<JobManager, _, _>(JOBS, &[CONFIG], |deps| async move {
        let config = deps.get::<Config>(CONFIG)?;
        Ok(JobManager::new(config.tools.exec.clone()))
    });

    Ok(container)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permission updates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Switch the active permission mode. Later loop iterations see it.
pub async fn set_mode(services: &Arc<ServiceContainer>, mode: PermissionMode) -> Result<()> {
    let current = services.get_typed::<PermissionContext>(TOOL_PERMISSIONS).await?;
    services.set(TOOL_PERMISSIONS, current.with_mode(mode));
    Ok(())
}

/// Persist an allow rule and reload the permission context, keeping the
/// mode that was active. A pattern that does not parse is rejected before
/// anything is written.
pub async fn always_allow(services: &Arc<ServiceContainer>, pattern: &str) -> Result<()> {
    parse_tool_pattern(pattern)?;
    let config = services.get_typed::<Config>(CONFIG).await?;
    let path = policy_file_path(&config);
    let mut file = PolicyFile::load(&path)?;
    if file.add_allow(pattern) {
        file.save(&path)?;
        tracing::info!(pattern = %pattern, path = %path.display(), "allow rule saved");
    }

    let previous = services
        .get_typed::<PermissionContext>(TOOL_PERMISSIONS)
        .await?
        .mode();
    let reloaded = services
        .reload_typed::<PermissionContext>(TOOL_PERMISSIONS)
        .await?;
    if reloaded.mode() != previous {
        services.set(TOOL_PERMISSIONS, reloaded.with_mode(previous));
    }
    Ok(())
}
