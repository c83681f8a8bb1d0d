//! Server configuration, sourced from the process environment.

use forge_flow::FlowConfig;

use crate::error::{BootstrapError, BootstrapResult};

const ENV_KIND: &str = "FORGE_KIND";
const ENV_LISTEN_ADDR: &str = "FORGE_LISTEN_ADDR";
const ENV_CALLBACK_URL: &str = "FORGE_CALLBACK_URL";
const ENV_CLUSTER_MODE: &str = "FORGE_CLUSTER_MODE";
const ENV_EXCLUDE_KINDS: &str = "FORGE_EXCLUDE_KINDS";
const ENV_LOG_FORMAT: &str = "FORGE_LOG_FORMAT";

const ENV_GIT_SERVER: &str = "FORGE_GIT_SERVER";
const ENV_GIT_USER: &str = "FORGE_GIT_USER";
const ENV_GIT_PASSWORD: &str = "FORGE_GIT_PASSWORD";
const ENV_REGISTRY_SERVER: &str = "FORGE_REGISTRY_SERVER";
const ENV_REGISTRY_USER: &str = "FORGE_REGISTRY_USER";
const ENV_REGISTRY_PASSWORD: &str = "FORGE_REGISTRY_PASSWORD";
const ENV_BUILD_TOOL_IMAGE: &str = "FORGE_BUILD_TOOL_IMAGE";
const ENV_DEST_REPO: &str = "FORGE_DEST_REPO";
const ENV_CACHE_REPO: &str = "FORGE_CACHE_REPO";

/// Which intent kind this process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    /// CI build intents.
    Ci,
    /// CD deploy intents.
    Cd,
    /// Unit-test intents.
    Unit,
    /// Sonar-scan intents.
    Sonar,
}

impl IntentKind {
    /// Parses the kind selector.
    ///
    /// # Errors
    ///
    /// Fails on anything but `ci`, `cd`, `unit` or `sonar`.
    pub fn parse(value: &str) -> BootstrapResult<Self> {
        match value {
            "ci" => Ok(Self::Ci),
            "cd" => Ok(Self::Cd),
            "unit" => Ok(Self::Unit),
            "sonar" => Ok(Self::Sonar),
            other => Err(BootstrapError::new(format!(
                "unknown intent kind ({other}); expected ci, cd, unit or sonar"
            ))),
        }
    }

    /// Returns the selector's wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ci => "ci",
            Self::Cd => "cd",
            Self::Unit => "unit",
            Self::Sonar => "sonar",
        }
    }
}

/// How the process reaches the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusterMode {
    /// Self-contained in-memory cluster (development and tests).
    #[default]
    Memory,
    /// An external transport supplied behind the `ClusterBackend` seam.
    External,
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Intent kind this controller serves.
    pub kind: IntentKind,
    /// HTTP listen address.
    pub listen_addr: String,
    /// Callback URL completion payloads are posted to.
    pub callback_url: String,
    /// Cluster access mode.
    pub cluster_mode: ClusterMode,
    /// Catalog kinds excluded at startup.
    pub excluded_kinds: Vec<String>,
    /// Emit JSON logs instead of pretty ones.
    pub json_logs: bool,
    /// Reconciliation defaults.
    pub flow: FlowConfig,
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails on unparseable selector values.
    pub fn from_env() -> BootstrapResult<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration with a custom environment source.
    ///
    /// Test-friendly entry point accepting a key lookup function.
    ///
    /// # Errors
    ///
    /// Fails on unparseable selector values.
    pub fn from_env_with<F>(get_env: F) -> BootstrapResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = match get_env(ENV_KIND) {
            Some(value) => IntentKind::parse(&value)?,
            None => IntentKind::Ci,
        };

        let cluster_mode = match get_env(ENV_CLUSTER_MODE).as_deref() {
            None | Some("memory") => ClusterMode::Memory,
            Some("external") => ClusterMode::External,
            Some(other) => {
                return Err(BootstrapError::new(format!(
                    "unknown cluster mode ({other}); expected memory or external"
                )));
            }
        };

        let mut flow = FlowConfig::default();
        let mut set = |key: &str, target: &mut String| {
            if let Some(value) = get_env(key) {
                *target = value;
            }
        };
        set(ENV_GIT_SERVER, &mut flow.git_server);
        set(ENV_GIT_USER, &mut flow.git_username);
        set(ENV_GIT_PASSWORD, &mut flow.git_password);
        set(ENV_REGISTRY_SERVER, &mut flow.registry_server);
        set(ENV_REGISTRY_USER, &mut flow.registry_username);
        set(ENV_REGISTRY_PASSWORD, &mut flow.registry_password);
        set(ENV_BUILD_TOOL_IMAGE, &mut flow.build_tool_image);
        set(ENV_DEST_REPO, &mut flow.dest_repo);
        set(ENV_CACHE_REPO, &mut flow.cache_repo);

        Ok(Self {
            kind,
            listen_addr: get_env(ENV_LISTEN_ADDR).unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            callback_url: get_env(ENV_CALLBACK_URL)
                .unwrap_or_else(|| "http://127.0.0.1:8081/callback".to_string()),
            cluster_mode,
            excluded_kinds: get_env(ENV_EXCLUDE_KINDS)
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            json_logs: get_env(ENV_LOG_FORMAT).as_deref() == Some("json"),
            flow,
        })
    }
}
