//! The CD reconciler: drives a deployment-style rollout directly.
//!
//! Unlike the pipeline kinds, CD has no task/pipeline chain: the intent is
//! rendered straight into a rollout in the target namespace, gated on that
//! namespace carrying the resource-limit annotation. Completion is observed
//! from rollout events labelled with the owning intent's name.

use serde_json::Value;

use forge_core::catalog::{CD, CONFIG_MAP, NAMESPACE, ROLLOUT};
use forge_core::cluster::EventKind;
use forge_core::object::Envelope;
use forge_core::{Selector, wait_or_cancelled};

use crate::config::FlowConfig;
use crate::datasource::DataSource;
use crate::error::{Error, Result};
use crate::intent::{AckState, ArtifactInfo, CdSpec, Intent};
use crate::reconcile::{RECONNECT_DELAY, complete_intent, is_unrecoverable};
use crate::supervisor::{CancelSignal, ErrorSink};
use crate::template::{Params, ROLLOUT_TPL, render};

/// Label on generated rollouts naming the owning CD intent.
pub const INTENT_LABEL: &str = "forge.dev/intent";

/// Annotation a deploy namespace must carry to accept workloads.
pub const RESOURCE_LIMIT_ANNOTATION: &str = "forge.dev/default-resource-limit";

/// Reconciler for CD intents.
#[derive(Debug)]
pub struct CdReconciler {
    ds: DataSource,
    config: FlowConfig,
}

impl CdReconciler {
    /// Creates the CD reconciler.
    #[must_use]
    pub fn new(ds: DataSource, config: FlowConfig) -> Self {
        Self { ds, config }
    }

    /// Runs the dispatch loop until cancellation.
    pub async fn run(self, mut cancel: CancelSignal, errors: ErrorSink) {
        let mut cd_version = String::from("0");
        let mut rollout_version = String::from("0");

        'watch: loop {
            let mut cd_stream = match self
                .ds
                .watch(
                    &self.config.intent_namespace,
                    CD,
                    &cd_version,
                    None,
                    Selector::All,
                )
                .await
            {
                Ok(stream) => stream,
                Err(err) => {
                    if self.report_or_retry(&err, &errors, &mut cancel).await {
                        return;
                    }
                    continue 'watch;
                }
            };

            // Rollouts land in per-intent deploy namespaces; watch them all,
            // narrowed to the ones this service labelled.
            let mut rollout_stream = match self
                .ds
                .watch(
                    "",
                    ROLLOUT,
                    &rollout_version,
                    None,
                    Selector::Raw(INTENT_LABEL.to_string()),
                )
                .await
            {
                Ok(stream) => stream,
                Err(err) => {
                    if self.report_or_retry(&err, &errors, &mut cancel).await {
                        return;
                    }
                    continue 'watch;
                }
            };

            tracing::info!(service = "cd", "watching cd and rollout channels");

            loop {
                tokio::select! {
                    _ = cancel.changed() => {
                        tracing::info!(service = "cd", "reconciler stopping");
                        return;
                    }
                    event = cd_stream.recv() => match event {
                        Some(event) => {
                            if event.kind == EventKind::Deleted {
                                continue;
                            }
                            if let Err(err) = self.reconcile_cd(&event.object).await {
                                tracing::warn!(
                                    service = "cd",
                                    name = %event.object.metadata.name,
                                    error = %err,
                                    "cd reconciliation failed; event dropped"
                                );
                            }
                            if let Some(version) = &event.object.metadata.resource_version {
                                cd_version = version.clone();
                            }
                        }
                        None => {
                            tracing::warn!(service = "cd", "cd channel closed");
                            break;
                        }
                    },
                    event = rollout_stream.recv() => match event {
                        Some(event) => {
                            if event.kind == EventKind::Deleted {
                                continue;
                            }
                            if let Err(err) = self.reconcile_rollout(&event.object).await {
                                tracing::warn!(
                                    service = "cd",
                                    name = %event.object.metadata.name,
                                    error = %err,
                                    "rollout reconciliation failed; event dropped"
                                );
                            }
                            if let Some(version) = &event.object.metadata.resource_version {
                                rollout_version = version.clone();
                            }
                        }
                        None => {
                            tracing::warn!(service = "cd", "rollout channel closed");
                            break;
                        }
                    },
                }
            }

            if wait_or_cancelled(&mut cancel, RECONNECT_DELAY).await {
                return;
            }
        }
    }

    async fn report_or_retry(
        &self,
        err: &Error,
        errors: &ErrorSink,
        cancel: &mut CancelSignal,
    ) -> bool {
        if is_unrecoverable(err) {
            tracing::error!(service = "cd", error = %err, "unrecoverable watch error");
            let _ = errors
                .send(Error::precondition(format!("cd reconciler stopped: {err}")))
                .await;
            return true;
        }
        tracing::warn!(service = "cd", error = %err, "watch failed; retrying");
        wait_or_cancelled(cancel, RECONNECT_DELAY).await
    }

    /// Converges one CD intent into a rollout (and config map, if needed).
    async fn reconcile_cd(&self, envelope: &Envelope) -> Result<()> {
        let intent: Intent<CdSpec> = Intent::from_envelope(envelope)?;
        if intent.spec.meta.done {
            return Ok(());
        }

        let spec = &intent.spec;
        let deploy_namespace = spec
            .deploy_namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| Error::precondition("cd intent has no deploy namespace"))?;
        let service_name = spec
            .service_name
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::precondition("cd intent has no service name"))?;

        self.check_namespace_gate(&deploy_namespace, &service_name)
            .await?;

        let mut artifact = spec.artifact_info.clone().unwrap_or_default();
        derive_sub_paths(&mut artifact);

        if !artifact.config_volumes.is_empty() {
            self.apply_config_map(&deploy_namespace, &service_name, &artifact)
                .await?;
        }

        let rollout = render(ROLLOUT_TPL, &rollout_params(&intent, &deploy_namespace, &artifact)?)?;
        self.ds
            .apply(&deploy_namespace, ROLLOUT, &service_name, &rollout, true)
            .await?;

        Ok(())
    }

    /// The deploy namespace must carry a parseable resource-limit
    /// annotation; its absence is a hard, non-retried failure for this
    /// event.
    async fn check_namespace_gate(&self, deploy_namespace: &str, service: &str) -> Result<()> {
        let namespace = self
            .ds
            .get("", NAMESPACE, deploy_namespace, &[])
            .await
            .map_err(|err| {
                Error::precondition(format!(
                    "cannot read deploy namespace ({deploy_namespace}): {err}"
                ))
            })?;

        let Some(content) = namespace
            .metadata
            .annotations
            .get(RESOURCE_LIMIT_ANNOTATION)
        else {
            return Err(Error::precondition(format!(
                "namespace ({deploy_namespace}) does not allow workloads for ({service})"
            )));
        };

        let limits: Vec<Value> = serde_json::from_str(content).map_err(|_| {
            Error::precondition(format!(
                "namespace ({deploy_namespace}) resource-limit annotation is not parseable"
            ))
        })?;
        if limits.is_empty() {
            return Err(Error::precondition(format!(
                "namespace ({deploy_namespace}) resource-limit annotation is empty"
            )));
        }

        Ok(())
    }

    async fn apply_config_map(
        &self,
        deploy_namespace: &str,
        service_name: &str,
        artifact: &ArtifactInfo,
    ) -> Result<()> {
        let mut data = serde_json::Map::new();
        for volume in &artifact.config_volumes {
            for item in &volume.cm_items {
                data.insert(
                    item.volume_name.clone(),
                    Value::String(item.volume_data.clone()),
                );
            }
        }

        let config_map = Envelope::new("v1", "ConfigMap", service_name, deploy_namespace)
            .with_section("data", Value::Object(data));
        self.ds
            .apply(deploy_namespace, CONFIG_MAP, service_name, &config_map, true)
            .await?;
        Ok(())
    }

    /// Marks the owning CD intent done when its rollout reports.
    async fn reconcile_rollout(&self, rollout: &Envelope) -> Result<()> {
        let Some(name) = rollout.metadata.labels.get(INTENT_LABEL) else {
            return Ok(());
        };

        let envelope = match self
            .ds
            .get(&self.config.intent_namespace, CD, name, &[])
            .await
        {
            Ok(envelope) => envelope,
            // A rollout without a live intent is not ours to complete.
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };

        let intent: Intent<CdSpec> = Intent::from_envelope(&envelope)?;
        if intent.spec.meta.done {
            return Ok(());
        }

        complete_intent::<CdSpec>(
            &self.ds,
            &self.config.intent_namespace,
            CD,
            name,
            AckState::Success,
        )
        .await
    }
}

/// Derives each config volume's sub-path from its mount path: the last
/// segment, cleared when the path has fewer than two segments.
fn derive_sub_paths(artifact: &mut ArtifactInfo) {
    for volume in &mut artifact.config_volumes {
        let segments: Vec<&str> = volume.mount_path.split('/').collect();
        if segments.len() < 2 {
            volume.sub_path = String::new();
        } else {
            volume.sub_path = (*segments.last().unwrap_or(&"")).to_string();
        }
    }
}

fn rollout_params(
    intent: &Intent<CdSpec>,
    deploy_namespace: &str,
    artifact: &ArtifactInfo,
) -> Result<Params> {
    let spec = &intent.spec;
    let service_name = spec.service_name.clone().unwrap_or_default();
    let image = spec
        .service_image
        .clone()
        .filter(|image| !image.is_empty())
        .ok_or_else(|| Error::precondition("cd intent has no service image"))?;

    let volume_mounts: Vec<Value> = artifact
        .config_volumes
        .iter()
        .map(|volume| {
            serde_json::json!({
                "name": volume.mount_name,
                "mountPath": volume.mount_path,
                "subPath": volume.sub_path,
            })
        })
        .collect();

    Ok(Params::new()
        .set("name", service_name)
        .set("namespace", deploy_namespace)
        .set("intentName", intent.metadata.name.clone())
        .set("replicas", spec.replicas.max(1).to_string())
        .set("image", image)
        .set("commandJson", encode_json(&artifact.command)?)
        .set("argsJson", encode_json(&artifact.arguments)?)
        .set("envJson", encode_json(&artifact.environments)?)
        .set("portsJson", encode_json(&artifact.service_ports)?)
        .set("volumeMountsJson", encode_json(&volume_mounts)?)
        .set("cpuLimit", spec.cpu_limit.clone().unwrap_or_default())
        .set("memLimit", spec.mem_limit.clone().unwrap_or_default())
        .set("cpuRequests", spec.cpu_requests.clone().unwrap_or_default())
        .set("memRequests", spec.mem_requests.clone().unwrap_or_default()))
}

/// JSON-encodes an artifact field for injection into the rollout template.
fn encode_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::template(format!("artifact field encode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use forge_core::{MemoryCluster, ResourceCatalog};
    use serde_json::json;
    use tokio::sync::{mpsc, watch};

    use crate::intent::{CmItem, ConfigVolume, RequestMeta};

    fn datasource() -> DataSource {
        DataSource::new(
            Arc::new(MemoryCluster::new()),
            Arc::new(ResourceCatalog::builtin(&[])),
        )
    }

    async fn seed_namespace(ds: &DataSource, name: &str, annotated: bool) {
        let mut namespace = Envelope::new("v1", "Namespace", name, "");
        if annotated {
            namespace.metadata.annotations.insert(
                RESOURCE_LIMIT_ANNOTATION.to_string(),
                json!([{"cpu": "4", "memory": "8Gi"}]).to_string(),
            );
        }
        ds.apply("", NAMESPACE, name, &namespace, true).await.unwrap();
    }

    fn cd_intent(name: &str, deploy_namespace: &str) -> Intent<CdSpec> {
        Intent::new(
            "CD",
            name,
            "forge",
            CdSpec {
                service_name: Some("svc".into()),
                service_image: Some("registry.example/svc:1".into()),
                deploy_namespace: Some(deploy_namespace.into()),
                cpu_limit: Some("1".into()),
                mem_limit: Some("512Mi".into()),
                cpu_requests: Some("100m".into()),
                mem_requests: Some("128Mi".into()),
                replicas: 2,
                artifact_info: Some(ArtifactInfo {
                    command: vec!["run".into()],
                    config_volumes: vec![ConfigVolume {
                        mount_name: "conf".into(),
                        mount_path: "/etc/svc/app.yaml".into(),
                        cm_items: vec![CmItem {
                            volume_name: "app.yaml".into(),
                            volume_data: "mode: prod".into(),
                            volume_path: "/etc/svc".into(),
                        }],
                        ..ConfigVolume::default()
                    }],
                    ..ArtifactInfo::default()
                }),
                meta: RequestMeta {
                    flow_id: Some("flow-cd".into()),
                    step_name: Some("deploy".into()),
                    uuid: Some("u-cd".into()),
                    ..RequestMeta::default()
                },
                ..CdSpec::default()
            },
        )
    }

    #[test]
    fn sub_path_is_last_segment_or_empty() {
        let mut artifact = ArtifactInfo {
            config_volumes: vec![
                ConfigVolume {
                    mount_path: "/etc/svc/app.yaml".into(),
                    ..ConfigVolume::default()
                },
                ConfigVolume {
                    mount_path: "flat".into(),
                    ..ConfigVolume::default()
                },
            ],
            ..ArtifactInfo::default()
        };
        derive_sub_paths(&mut artifact);
        assert_eq!(artifact.config_volumes[0].sub_path, "app.yaml");
        assert_eq!(artifact.config_volumes[1].sub_path, "");
    }

    #[tokio::test]
    async fn missing_annotation_creates_no_rollout() {
        let ds = datasource();
        seed_namespace(&ds, "prod", false).await;

        let reconciler = CdReconciler::new(ds.clone(), FlowConfig::default());
        let intent = cd_intent("svc-helm", "prod");
        let envelope = intent.to_envelope().unwrap();

        let err = reconciler.reconcile_cd(&envelope).await.unwrap_err();
        assert!(matches!(err, Error::Precondition { .. }));

        assert!(ds.get("prod", ROLLOUT, "svc", &[]).await.is_err());
        assert!(ds.get("prod", CONFIG_MAP, "svc", &[]).await.is_err());
    }

    #[tokio::test]
    async fn reconcile_creates_rollout_and_config_map() {
        let ds = datasource();
        seed_namespace(&ds, "prod", true).await;

        let reconciler = CdReconciler::new(ds.clone(), FlowConfig::default());
        let intent = cd_intent("svc-helm", "prod");
        reconciler
            .reconcile_cd(&intent.to_envelope().unwrap())
            .await
            .unwrap();

        let rollout = ds.get("prod", ROLLOUT, "svc", &[]).await.unwrap();
        assert_eq!(
            rollout.metadata.labels.get(INTENT_LABEL).unwrap(),
            "svc-helm"
        );
        assert_eq!(rollout.spec().unwrap()["replicas"], 2);
        assert_eq!(
            rollout.spec().unwrap()["template"]["spec"]["containers"][0]["volumeMounts"][0]
                ["subPath"],
            "app.yaml"
        );

        let config_map = ds.get("prod", CONFIG_MAP, "svc", &[]).await.unwrap();
        assert_eq!(config_map.sections["data"]["app.yaml"], "mode: prod");
    }

    #[tokio::test]
    async fn rollout_event_completes_the_intent() {
        let ds = datasource();
        seed_namespace(&ds, "prod", true).await;

        let config = FlowConfig::default();
        let reconciler = CdReconciler::new(ds.clone(), config.clone());

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (error_tx, _error_rx) = mpsc::channel(1);
        let handle = tokio::spawn(reconciler.run(cancel_rx, error_tx));

        let intent = cd_intent("svc-helm", "prod");
        ds.apply("forge", CD, "svc-helm", &intent.to_envelope().unwrap(), true)
            .await
            .unwrap();

        let mut done = false;
        for _ in 0..100 {
            let envelope = ds.get("forge", CD, "svc-helm", &[]).await.unwrap();
            let stored: Intent<CdSpec> = Intent::from_envelope(&envelope).unwrap();
            if stored.spec.meta.done {
                assert_eq!(stored.spec.meta.ack_states, vec![AckState::Success]);
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(done, "cd intent must complete after the rollout reports");

        handle.abort();
    }
}
