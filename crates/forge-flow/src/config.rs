//! Reconciliation configuration: namespaces, credential defaults, images.

use serde::{Deserialize, Serialize};

/// Namespace intent records live in.
pub const INTENT_NAMESPACE: &str = "forge";
/// Namespace generated execution resources live in.
pub const OPS_NAMESPACE: &str = "forge-ops";

/// Name of the git credentials secret.
pub const GIT_SECRET_NAME: &str = "forge-git-config";
/// Name of the registry credentials secret.
pub const REGISTRY_SECRET_NAME: &str = "forge-registry-config";
/// Service account whose secret list references the credential secrets.
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Injected defaults for reconciliation: namespaces, credentials, images
/// and repositories used when the intent does not override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlowConfig {
    /// Namespace intent records live in.
    pub intent_namespace: String,
    /// Namespace execution resources live in.
    pub ops_namespace: String,
    /// Git server base URL.
    pub git_server: String,
    /// Git username.
    pub git_username: String,
    /// Git password.
    pub git_password: String,
    /// Registry server base URL.
    pub registry_server: String,
    /// Registry username.
    pub registry_username: String,
    /// Registry password.
    pub registry_password: String,
    /// Image of the build tool container.
    pub build_tool_image: String,
    /// Default destination image repository.
    pub dest_repo: String,
    /// Build cache repository.
    pub cache_repo: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            intent_namespace: INTENT_NAMESPACE.to_string(),
            ops_namespace: OPS_NAMESPACE.to_string(),
            git_server: "http://git.forge.local".to_string(),
            git_username: "forge".to_string(),
            git_password: String::new(),
            registry_server: "http://registry.forge.local".to_string(),
            registry_username: "forge".to_string(),
            registry_password: String::new(),
            build_tool_image: "forge/buildkit:v0.24.0".to_string(),
            dest_repo: "registry.forge.local/forge".to_string(),
            cache_repo: "registry.forge.local/forge-repo-cache".to_string(),
        }
    }
}
