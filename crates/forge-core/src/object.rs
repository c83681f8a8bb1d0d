//! The typed object envelope exchanged with the cluster.
//!
//! Generated child resources are genuinely schema-free (their shape comes
//! from external templates), so the envelope keeps identity and metadata
//! strongly typed and carries the remaining top-level sections (`spec`,
//! `data`, `status`, ...) as a dynamic document. Intent records have typed
//! representations in `forge-flow` and convert through this envelope at the
//! cluster boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Top-level sections an apply overwrites wholesale when the desired object
/// carries them. Everything else on the stored object is left alone.
const REPLACED_SECTIONS: &[&str] = &[
    "spec",
    "data",
    "binaryData",
    "stringData",
    "type",
    "secrets",
    "imagePullSecrets",
];

/// An owner reference from a child resource to its controlling parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// API version of the owner.
    pub api_version: String,
    /// Kind of the owner.
    pub kind: String,
    /// Name of the owner.
    pub name: String,
    /// UID of the owner.
    pub uid: String,
}

/// Object metadata: identity plus bookkeeping the cluster maintains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Object name, unique within a namespace for a kind.
    pub name: String,
    /// Namespace; empty for cluster-scoped kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels, merged per key on apply.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations, merged per key on apply.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Owner references; replaced wholesale when the desired object has any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    /// Opaque version token for optimistic concurrency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// When the cluster first stored the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    /// Unique identifier assigned by the cluster on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// A cluster object: typed identity and metadata plus a dynamic payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// API version, e.g. `forge.dev/v1`.
    pub api_version: String,
    /// Kind, e.g. `PipelineRun`.
    pub kind: String,
    /// Object metadata.
    pub metadata: Metadata,
    /// Remaining top-level sections (`spec`, `data`, `status`, ...).
    #[serde(flatten)]
    pub sections: BTreeMap<String, Value>,
}

impl Envelope {
    /// Creates an envelope with the given identity and empty payload.
    #[must_use]
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: Metadata {
                name: name.into(),
                namespace: Some(namespace.into()),
                ..Metadata::default()
            },
            sections: BTreeMap::new(),
        }
    }

    /// Returns the `spec` section, if present.
    #[must_use]
    pub fn spec(&self) -> Option<&Value> {
        self.sections.get("spec")
    }

    /// Sets a payload section, returning the envelope for chaining.
    #[must_use]
    pub fn with_section(mut self, key: impl Into<String>, value: Value) -> Self {
        self.sections.insert(key.into(), value);
        self
    }

    /// Points this object's single owner reference at the given parent.
    ///
    /// Any previous owners are dropped; the rewire after a pipeline-run
    /// recreation must not leave a stale UID behind.
    pub fn set_owner(&mut self, owner: OwnerReference) {
        self.metadata.owner_references = vec![owner];
    }

    /// Decodes the envelope into a typed value via JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` when the payload does not match the
    /// target shape.
    pub fn to_typed<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let value = serde_json::to_value(self).map_err(|e| {
            Error::serialization(format!("envelope encode for {}: {e}", self.metadata.name))
        })?;
        serde_json::from_value(value).map_err(|e| {
            Error::serialization(format!("envelope decode for {}: {e}", self.metadata.name))
        })
    }

    /// Encodes a typed value into an envelope via JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` when the value does not carry the
    /// envelope's identity fields.
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self> {
        let json = serde_json::to_value(value)
            .map_err(|e| Error::serialization(format!("typed encode: {e}")))?;
        serde_json::from_value(json)
            .map_err(|e| Error::serialization(format!("typed decode into envelope: {e}")))
    }
}

/// Applies the desired object onto a stored one, in place.
///
/// The merge is asymmetric by design: payload sections named in the desired
/// object replace their stored counterparts wholesale, while labels and
/// annotations are merged per key with the desired value winning. Owner
/// references are replaced when the desired object carries any; a per-key
/// union would keep a stale owner alive across a pipeline-run recreation.
/// The stored object's name, namespace, uid and resource version are kept.
pub fn merge_from_desired(stored: &mut Envelope, desired: &Envelope) {
    for key in REPLACED_SECTIONS {
        if let Some(value) = desired.sections.get(*key) {
            stored.sections.insert((*key).to_string(), value.clone());
        }
    }

    for (k, v) in &desired.metadata.labels {
        stored.metadata.labels.insert(k.clone(), v.clone());
    }
    for (k, v) in &desired.metadata.annotations {
        stored
            .metadata
            .annotations
            .insert(k.clone(), v.clone());
    }
    if !desired.metadata.owner_references.is_empty() {
        stored.metadata.owner_references = desired.metadata.owner_references.clone();
    }
}

/// Compares the `spec` sections of two objects for equality.
///
/// Returns `false` when either object has no `spec` section; callers use
/// this for compare-then-apply, so "cannot compare" deliberately falls
/// through to an (idempotent) apply rather than an error.
#[must_use]
pub fn same_spec(a: &Envelope, b: &Envelope) -> bool {
    match (a.spec(), b.spec()) {
        (Some(sa), Some(sb)) => sa == sb,
        _ => false,
    }
}
