//! Resource catalog: short names to fully-qualified kind identities.
//!
//! The catalog is an explicit registry constructed once at process start and
//! passed by reference to every component that needs it. An exclusion list
//! applied at construction removes kinds the deployment does not serve.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Catalog name for CI intent records.
pub const CI: &str = "cis";
/// Catalog name for CD intent records.
pub const CD: &str = "cds";
/// Catalog name for unit-test intent records.
pub const UNIT: &str = "units";
/// Catalog name for sonar-scan intent records.
pub const SONAR: &str = "sonars";

/// Catalog name for reusable build tasks.
pub const TASK: &str = "tasks";
/// Catalog name for pipelines.
pub const PIPELINE: &str = "pipelines";
/// Catalog name for pipeline runs.
pub const PIPELINE_RUN: &str = "pipelineruns";
/// Catalog name for pipeline git-checkout resources.
pub const PIPELINE_RESOURCE: &str = "pipelineresources";
/// Catalog name for flow graphs.
pub const FLOW_GRAPH: &str = "flowgraphs";
/// Catalog name for CD rollouts.
pub const ROLLOUT: &str = "rollouts";

/// Catalog name for secrets.
pub const SECRET: &str = "secrets";
/// Catalog name for service accounts.
pub const SERVICE_ACCOUNT: &str = "serviceaccounts";
/// Catalog name for config maps.
pub const CONFIG_MAP: &str = "configmaps";
/// Catalog name for namespaces.
pub const NAMESPACE: &str = "namespaces";
/// Catalog name for pods.
pub const POD: &str = "pods";

/// A fully-qualified kind identity on the workload platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindRef {
    /// API group; empty for the core group.
    pub group: String,
    /// API version within the group.
    pub version: String,
    /// Plural resource name used on the wire.
    pub plural: String,
    /// Kind name used in object bodies.
    pub kind: String,
}

impl KindRef {
    fn new(group: &str, version: &str, plural: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            plural: plural.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Renders the `apiVersion` string for object bodies.
    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// Registry mapping catalog names to kind identities.
#[derive(Debug, Default)]
pub struct ResourceCatalog {
    entries: BTreeMap<String, KindRef>,
}

impl ResourceCatalog {
    /// Builds the catalog with every kind Forge drives, minus `excluded`.
    #[must_use]
    pub fn builtin(excluded: &[&str]) -> Self {
        let mut catalog = Self::default();

        catalog.register(CI, KindRef::new("forge.dev", "v1", CI, "CI"));
        catalog.register(CD, KindRef::new("forge.dev", "v1", CD, "CD"));
        catalog.register(UNIT, KindRef::new("forge.dev", "v1", UNIT, "Unit"));
        catalog.register(SONAR, KindRef::new("forge.dev", "v1", SONAR, "Sonar"));

        catalog.register(
            TASK,
            KindRef::new("pipeline.forge.dev", "v1alpha1", TASK, "Task"),
        );
        catalog.register(
            PIPELINE,
            KindRef::new("pipeline.forge.dev", "v1alpha1", PIPELINE, "Pipeline"),
        );
        catalog.register(
            PIPELINE_RUN,
            KindRef::new("pipeline.forge.dev", "v1alpha1", PIPELINE_RUN, "PipelineRun"),
        );
        catalog.register(
            PIPELINE_RESOURCE,
            KindRef::new(
                "pipeline.forge.dev",
                "v1alpha1",
                PIPELINE_RESOURCE,
                "PipelineResource",
            ),
        );
        catalog.register(
            FLOW_GRAPH,
            KindRef::new("graph.forge.dev", "v1", FLOW_GRAPH, "FlowGraph"),
        );
        catalog.register(ROLLOUT, KindRef::new("apps.forge.dev", "v1", ROLLOUT, "Rollout"));

        catalog.register(SECRET, KindRef::new("", "v1", SECRET, "Secret"));
        catalog.register(
            SERVICE_ACCOUNT,
            KindRef::new("", "v1", SERVICE_ACCOUNT, "ServiceAccount"),
        );
        catalog.register(CONFIG_MAP, KindRef::new("", "v1", CONFIG_MAP, "ConfigMap"));
        catalog.register(NAMESPACE, KindRef::new("", "v1", NAMESPACE, "Namespace"));
        catalog.register(POD, KindRef::new("", "v1", POD, "Pod"));

        for name in excluded {
            catalog.entries.remove(*name);
        }

        catalog
    }

    /// Registers a kind under a catalog name; first registration wins.
    pub fn register(&mut self, name: &str, kind: KindRef) {
        self.entries.entry(name.to_string()).or_insert(kind);
    }

    /// Looks up the kind identity for a catalog name.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for names the catalog does not carry.
    pub fn kind_ref(&self, name: &str) -> Result<&KindRef> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::InvalidInput(format!("resource ({name}) not registered")))
    }

    /// Iterates over registered catalog names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registers_intents_and_children() {
        let catalog = ResourceCatalog::builtin(&[]);
        assert_eq!(catalog.kind_ref(CI).unwrap().kind, "CI");
        assert_eq!(
            catalog.kind_ref(PIPELINE_RUN).unwrap().api_version(),
            "pipeline.forge.dev/v1alpha1"
        );
        assert_eq!(catalog.kind_ref(SECRET).unwrap().api_version(), "v1");
    }

    #[test]
    fn exclusions_are_applied_at_construction() {
        let catalog = ResourceCatalog::builtin(&[SONAR]);
        assert!(catalog.kind_ref(SONAR).is_err());
        assert!(catalog.kind_ref(CI).is_ok());
    }

    #[test]
    fn unknown_name_is_invalid_input() {
        let catalog = ResourceCatalog::builtin(&[]);
        let err = catalog.kind_ref("widgets").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn duplicate_registration_keeps_first() {
        let mut catalog = ResourceCatalog::builtin(&[]);
        catalog.register(CI, KindRef::new("other.dev", "v2", "cis", "Other"));
        assert_eq!(catalog.kind_ref(CI).unwrap().group, "forge.dev");
    }
}
