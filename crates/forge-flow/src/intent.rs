//! Typed intent records.
//!
//! An intent record expresses "please build/deploy/test/scan X". Its
//! identity is immutable; the spec carries kind-specific parameters, the
//! completion flag, the ordered ack-state list and the correlation triple
//! the caller needs echoed back verbatim. Intent records stay strongly
//! typed end to end and convert through the object envelope only at the
//! cluster boundary.

use serde::{Deserialize, Serialize};

use forge_core::object::{Envelope, Metadata};

use crate::error::Result;

/// API version intent records are persisted under.
pub const INTENT_API_VERSION: &str = "forge.dev/v1";

/// Outcome token reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckState {
    /// The run completed successfully.
    #[serde(rename = "SUCCESS")]
    Success,
    /// The run failed or was superseded.
    #[serde(rename = "FAIL")]
    Fail,
}

/// Completion and correlation fields shared by every intent kind.
///
/// `done == true` implies `ack_states` is non-empty; the first entry is
/// authoritative and later entries are preserved but ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    /// Whether the intent has reached a terminal state.
    #[serde(default)]
    pub done: bool,
    /// Ordered outcome tokens; the first entry is authoritative.
    #[serde(default)]
    pub ack_states: Vec<AckState>,
    /// Caller's flow identifier, echoed in the callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    /// Caller's step name, echoed in the callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    /// Caller's request identifier, echoed in the callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl RequestMeta {
    /// Marks the intent terminal with exactly one outcome token.
    pub fn complete(&mut self, state: AckState) {
        self.done = true;
        self.ack_states = vec![state];
    }

    /// Returns the authoritative outcome, if the intent is terminal.
    #[must_use]
    pub fn outcome(&self) -> Option<AckState> {
        if self.done {
            self.ack_states.first().copied()
        } else {
            None
        }
    }
}

/// Access to the completion/correlation fields every intent spec carries.
pub trait IntentSpec: Serialize + serde::de::DeserializeOwned + Clone + Send + Sync {
    /// Shared completion and correlation fields.
    fn meta(&self) -> &RequestMeta;
    /// Mutable access to the shared fields.
    fn meta_mut(&mut self) -> &mut RequestMeta;
}

macro_rules! impl_intent_spec {
    ($($spec:ty),+) => {
        $(impl IntentSpec for $spec {
            fn meta(&self) -> &RequestMeta {
                &self.meta
            }
            fn meta_mut(&mut self) -> &mut RequestMeta {
                &mut self.meta
            }
        })+
    };
}

/// A typed intent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent<S> {
    /// API version, always [`INTENT_API_VERSION`] for intents.
    pub api_version: String,
    /// Intent kind (`CI`, `CD`, `Unit`, `Sonar`).
    pub kind: String,
    /// Object metadata.
    pub metadata: Metadata,
    /// Kind-specific parameters plus completion/correlation fields.
    pub spec: S,
}

impl<S: Serialize + serde::de::DeserializeOwned> Intent<S> {
    /// Creates an intent record with the given identity and spec.
    #[must_use]
    pub fn new(kind: &str, name: &str, namespace: &str, spec: S) -> Self {
        Self {
            api_version: INTENT_API_VERSION.to_string(),
            kind: kind.to_string(),
            metadata: Metadata {
                name: name.to_string(),
                namespace: Some(namespace.to_string()),
                ..Metadata::default()
            },
            spec,
        }
    }

    /// Decodes an intent from a cluster envelope.
    ///
    /// # Errors
    ///
    /// Fails when the envelope payload does not match the intent shape.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        Ok(envelope.to_typed()?)
    }

    /// Encodes the intent as a cluster envelope.
    ///
    /// # Errors
    ///
    /// Fails when the spec does not serialize.
    pub fn to_envelope(&self) -> Result<Envelope> {
        Ok(Envelope::from_typed(self)?)
    }
}

/// Spec of a CI (build) intent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiSpec {
    /// Source repository URL; must end in `.git`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    /// Branch to build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Commit to build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    /// Language hint for the build tool.
    #[serde(default)]
    pub code_type: String,
    /// Requested retry budget; informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Destination image repository; empty uses the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Path of the project inside the repository.
    #[serde(default)]
    pub project_path: String,
    /// Project build file.
    #[serde(default)]
    pub project_file: String,
    /// Completion and correlation fields.
    #[serde(flatten)]
    pub meta: RequestMeta,
}

/// Mountable config item of a CD config volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmItem {
    /// Key the item is stored under.
    pub volume_name: String,
    /// Path the item is mounted at.
    pub volume_path: String,
    /// File content.
    pub volume_data: String,
}

/// A config volume mounted into a deployed service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigVolume {
    /// Volume name.
    pub mount_name: String,
    /// Mount path inside the container.
    pub mount_path: String,
    /// Sub-path within the mount, derived from the mount path.
    #[serde(default)]
    pub sub_path: String,
    /// Volume kind.
    #[serde(default)]
    pub kind: String,
    /// Config items carried by the volume.
    #[serde(default)]
    pub cm_items: Vec<CmItem>,
}

/// An exposed service port.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    /// Port name.
    pub name: String,
    /// Protocol.
    pub protocol: String,
    /// Service port.
    pub port: i32,
    /// Container target port.
    pub target_port: i32,
}

/// An environment variable of a deployed service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub envvalue: String,
}

/// Deployment topology of a CD intent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    /// Container command.
    #[serde(default)]
    pub command: Vec<String>,
    /// Container arguments.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Environment variables.
    #[serde(default)]
    pub environments: Vec<EnvVar>,
    /// Exposed ports.
    #[serde(default)]
    pub service_ports: Vec<ServicePort>,
    /// Config volumes.
    #[serde(default)]
    pub config_volumes: Vec<ConfigVolume>,
}

/// Spec of a CD (deploy) intent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdSpec {
    /// Name of the service being deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// Image to deploy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_image: Option<String>,
    /// Target namespace; must carry the resource-limit annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_namespace: Option<String>,
    /// Deployment topology.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_info: Option<ArtifactInfo>,
    /// Deployment flavor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_type: Option<String>,
    /// CPU limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    /// Storage capacity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_capacity: Option<String>,
    /// Memory limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<String>,
    /// CPU requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_requests: Option<String>,
    /// Memory requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_requests: Option<String>,
    /// Update policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    /// Replica count.
    #[serde(default)]
    pub replicas: u32,
    /// Completion and correlation fields.
    #[serde(flatten)]
    pub meta: RequestMeta,
}

/// Spec of a unit-test intent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSpec {
    /// Source repository URL; must end in `.git`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    /// Branch to test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Language of the project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Build flavor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    /// Toolchain version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Test command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Completion and correlation fields.
    #[serde(flatten)]
    pub meta: RequestMeta,
}

/// Spec of a sonar-scan intent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SonarSpec {
    /// Source repository URL; must end in `.git`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    /// Branch to scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Language of the project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Service name used to scope the scan.
    #[serde(default)]
    pub service_name: String,
    /// Completion and correlation fields.
    #[serde(flatten)]
    pub meta: RequestMeta,
}

impl_intent_spec!(CiSpec, CdSpec, UnitSpec, SonarSpec);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_states_serialize_as_tokens() {
        let json = serde_json::to_string(&vec![AckState::Success, AckState::Fail]).unwrap();
        assert_eq!(json, r#"["SUCCESS","FAIL"]"#);
    }

    #[test]
    fn ci_spec_uses_wire_field_names() {
        let spec = CiSpec {
            git_url: Some("http://git.example/org/app.git".into()),
            branch: Some("main".into()),
            commit_id: Some("abc123".into()),
            meta: RequestMeta {
                flow_id: Some("f-1".into()),
                step_name: Some("build".into()),
                uuid: Some("u-1".into()),
                ..RequestMeta::default()
            },
            ..CiSpec::default()
        };

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["gitUrl"], "http://git.example/org/app.git");
        assert_eq!(json["commitId"], "abc123");
        assert_eq!(json["flowId"], "f-1");
        assert_eq!(json["stepName"], "build");
        assert_eq!(json["done"], false);
        // Absent optionals stay absent, not empty strings.
        assert!(json.get("output").is_none());
    }

    #[test]
    fn complete_replaces_ack_states() {
        let mut meta = RequestMeta {
            ack_states: vec![AckState::Success],
            ..RequestMeta::default()
        };
        meta.complete(AckState::Fail);
        assert!(meta.done);
        assert_eq!(meta.ack_states, vec![AckState::Fail]);
        assert_eq!(meta.outcome(), Some(AckState::Fail));
    }

    #[test]
    fn outcome_requires_done() {
        let meta = RequestMeta {
            ack_states: vec![AckState::Success],
            ..RequestMeta::default()
        };
        assert_eq!(meta.outcome(), None);
    }

    #[test]
    fn intent_roundtrips_through_envelope() {
        let intent = Intent::new(
            "CI",
            "app-main",
            "forge",
            CiSpec {
                git_url: Some("http://git.example/org/app.git".into()),
                branch: Some("main".into()),
                ..CiSpec::default()
            },
        );

        let envelope = intent.to_envelope().unwrap();
        assert_eq!(envelope.kind, "CI");
        assert_eq!(envelope.spec().unwrap()["gitUrl"], "http://git.example/org/app.git");

        let back: Intent<CiSpec> = Intent::from_envelope(&envelope).unwrap();
        assert_eq!(back, intent);
    }
}
