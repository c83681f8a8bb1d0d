//! The shared pipeline convergence recipe.
//!
//! CI, Unit and Sonar intents drive the same execution-resource graph with
//! different names and templates: reusable task + pipeline + graph, a
//! per-run checkout resource and graph, and a pipeline run that is deleted
//! and recreated on every convergence so a resubmission starts a fresh run
//! instead of mutating an in-flight one. Every step is an apply, so a
//! partially-converged graph is completed by the next event.

use serde_json::Value;

use forge_core::catalog::{
    FLOW_GRAPH, PIPELINE, PIPELINE_RESOURCE, PIPELINE_RUN, SECRET, SERVICE_ACCOUNT, TASK,
};
use forge_core::object::{Envelope, OwnerReference, same_spec};

use crate::config::{DEFAULT_SERVICE_ACCOUNT, FlowConfig, GIT_SECRET_NAME, REGISTRY_SECRET_NAME};
use crate::datasource::DataSource;
use crate::error::{Error, Result};
use crate::template::{
    GIT_SECRET_TPL, GRAPH_TPL, PIPELINE_RESOURCE_TPL, PIPELINE_RUN_TPL, PIPELINE_TPL,
    Params, REGISTRY_SECRET_TPL, TASK_TPL, render,
};

/// Names and suffix of one intent kind's pipeline recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineProfile {
    /// Name of the reusable task.
    pub task_name: &'static str,
    /// Name of the reusable pipeline.
    pub pipeline_name: &'static str,
    /// Name of the reusable top-level graph.
    pub graph_name: &'static str,
    /// Kind suffix appended to derived run names.
    pub run_suffix: Option<&'static str>,
}

/// Recipe for CI builds.
pub const CI_PROFILE: PipelineProfile = PipelineProfile {
    task_name: "forge-build-task",
    pipeline_name: "forge-build-pipeline",
    graph_name: "forge-build-graph",
    run_suffix: None,
};

/// Recipe for unit-test runs.
pub const UNIT_PROFILE: PipelineProfile = PipelineProfile {
    task_name: "forge-unit-task",
    pipeline_name: "forge-unit-pipeline",
    graph_name: "forge-unit-graph",
    run_suffix: Some("unit"),
};

/// Recipe for sonar scans.
pub const SONAR_PROFILE: PipelineProfile = PipelineProfile {
    task_name: "forge-unit-task",
    pipeline_name: "forge-unit-pipeline",
    graph_name: "forge-unit-graph",
    run_suffix: Some("sonar"),
};

/// Per-run parameters of one convergence.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Derived run name (also the per-run resource names).
    pub run_name: String,
    /// Project extracted from the git URL.
    pub project: String,
    /// Source repository URL.
    pub git_url: String,
    /// Branch to check out.
    pub branch: String,
    /// Commit to build; empty builds the branch head.
    pub commit: String,
    /// Destination repository override.
    pub output: Option<String>,
    /// Language hint; empty renders as `none`.
    pub code_type: String,
    /// Command for test/scan steps.
    pub command: String,
}

/// Executes the pipeline convergence recipe for one intent kind.
#[derive(Debug, Clone)]
pub struct Convergence {
    ds: DataSource,
    config: FlowConfig,
    profile: PipelineProfile,
}

impl Convergence {
    /// Creates the convergence executor for one profile.
    #[must_use]
    pub fn new(ds: DataSource, config: FlowConfig, profile: PipelineProfile) -> Self {
        Self {
            ds,
            config,
            profile,
        }
    }

    /// Returns the profile this executor converges.
    #[must_use]
    pub const fn profile(&self) -> &PipelineProfile {
        &self.profile
    }

    /// Derives the per-run graph name.
    #[must_use]
    pub fn run_graph_name(&self, run_name: &str) -> String {
        format!("{}-{run_name}", self.profile.graph_name)
    }

    /// Converges the full execution-resource graph for one run.
    ///
    /// Order: credentials, task, pipeline, shared graph, per-run checkout
    /// resource, per-run graph, pipeline run (delete + recreate when one
    /// exists), owner rewire. Returns the live pipeline run.
    ///
    /// # Errors
    ///
    /// Any step failure aborts this convergence; the caller drops the event
    /// and the next watch event retries idempotently.
    pub async fn converge(&self, request: &RunRequest) -> Result<Envelope> {
        self.ensure_credentials().await?;
        self.ensure_task().await?;
        self.ensure_pipeline().await?;
        self.ensure_graph(self.profile.graph_name).await?;
        self.ensure_pipeline_resource(request).await?;

        let run_graph_name = self.run_graph_name(&request.run_name);
        self.ensure_graph(&run_graph_name).await?;

        self.recreate_pipeline_run(request, &run_graph_name).await
    }

    /// Ensures both credential secrets and their service-account references.
    pub async fn ensure_credentials(&self) -> Result<()> {
        let ns = &self.config.ops_namespace;

        let git = render(
            GIT_SECRET_TPL,
            &Params::new()
                .set("name", GIT_SECRET_NAME)
                .set("namespace", ns.clone())
                .set("gitServer", self.config.git_server.clone())
                .set("username", self.config.git_username.clone())
                .set("password", self.config.git_password.clone()),
        )?;
        self.ensure_secret(GIT_SECRET_NAME, &git).await?;
        self.ensure_service_account_reference(GIT_SECRET_NAME).await?;

        let registry = render(
            REGISTRY_SECRET_TPL,
            &Params::new()
                .set("name", REGISTRY_SECRET_NAME)
                .set("namespace", ns.clone())
                .set("registryServer", self.config.registry_server.clone())
                .set("username", self.config.registry_username.clone())
                .set("password", self.config.registry_password.clone()),
        )?;
        self.ensure_secret(REGISTRY_SECRET_NAME, &registry).await?;
        self.ensure_service_account_reference(REGISTRY_SECRET_NAME)
            .await?;

        Ok(())
    }

    async fn ensure_secret(&self, name: &str, desired: &Envelope) -> Result<Envelope> {
        let ns = &self.config.ops_namespace;
        match self.ds.get(ns, SECRET, name, &[]).await {
            Err(err) if err.is_not_found() => {
                let (stored, _) = self.ds.apply(ns, SECRET, name, desired, true).await?;
                Ok(stored)
            }
            Err(err) => Err(err),
            Ok(stored) => {
                if same_spec(desired, &stored) {
                    Ok(stored)
                } else {
                    let (stored, _) = self.ds.apply(ns, SECRET, name, desired, true).await?;
                    Ok(stored)
                }
            }
        }
    }

    /// Adds `secret_name` to the default service account's secret list if it
    /// is not already referenced. A true set union: nothing is ever removed.
    async fn ensure_service_account_reference(&self, secret_name: &str) -> Result<()> {
        let ns = &self.config.ops_namespace;
        let mut account = self
            .ds
            .get(ns, SERVICE_ACCOUNT, DEFAULT_SERVICE_ACCOUNT, &[])
            .await?;

        let secrets = account
            .sections
            .get("secrets")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if secrets.is_empty() {
            return Err(Error::precondition(format!(
                "service account {DEFAULT_SERVICE_ACCOUNT} in {ns} has no secret list"
            )));
        }

        let referenced = secrets
            .iter()
            .any(|entry| entry.get("name").and_then(Value::as_str) == Some(secret_name));
        if referenced {
            return Ok(());
        }

        let mut updated = secrets;
        updated.push(serde_json::json!({ "name": secret_name }));
        account
            .sections
            .insert("secrets".to_string(), Value::Array(updated));

        self.ds
            .apply(ns, SERVICE_ACCOUNT, DEFAULT_SERVICE_ACCOUNT, &account, false)
            .await?;
        Ok(())
    }

    async fn ensure_task(&self) -> Result<Envelope> {
        let desired = render(
            TASK_TPL,
            &Params::new()
                .set("name", self.profile.task_name)
                .set("namespace", self.config.ops_namespace.clone())
                .set("buildToolImage", self.config.build_tool_image.clone()),
        )?;
        self.compare_then_apply(TASK, self.profile.task_name, &desired)
            .await
    }

    async fn ensure_pipeline(&self) -> Result<Envelope> {
        let desired = render(
            PIPELINE_TPL,
            &Params::new()
                .set("name", self.profile.pipeline_name)
                .set("namespace", self.config.ops_namespace.clone())
                .set("graphName", self.profile.graph_name)
                .set("taskName", self.profile.task_name),
        )?;
        self.compare_then_apply(PIPELINE, self.profile.pipeline_name, &desired)
            .await
    }

    async fn compare_then_apply(
        &self,
        kind: &str,
        name: &str,
        desired: &Envelope,
    ) -> Result<Envelope> {
        let ns = &self.config.ops_namespace;
        match self.ds.get(ns, kind, name, &[]).await {
            Err(err) if err.is_not_found() => {
                let (stored, _) = self.ds.apply(ns, kind, name, desired, true).await?;
                Ok(stored)
            }
            Err(err) => Err(err),
            Ok(stored) if same_spec(desired, &stored) => Ok(stored),
            Ok(_) => {
                let (stored, _) = self.ds.apply(ns, kind, name, desired, true).await?;
                Ok(stored)
            }
        }
    }

    /// Applies a graph by name; succeeds whether it is new or existing.
    pub async fn ensure_graph(&self, name: &str) -> Result<Envelope> {
        let desired = render(
            GRAPH_TPL,
            &Params::new()
                .set("name", name)
                .set("namespace", self.config.ops_namespace.clone()),
        )?;
        let (stored, _) = self
            .ds
            .apply(&self.config.ops_namespace, FLOW_GRAPH, name, &desired, true)
            .await?;
        Ok(stored)
    }

    /// Re-applies the per-run checkout resource; cheap, no dedup needed.
    async fn ensure_pipeline_resource(&self, request: &RunRequest) -> Result<Envelope> {
        let desired = render(
            PIPELINE_RESOURCE_TPL,
            &Params::new()
                .set("name", request.run_name.clone())
                .set("namespace", self.config.ops_namespace.clone())
                .set("gitUrl", request.git_url.clone())
                .set("branch", request.branch.clone()),
        )?;
        let (stored, _) = self
            .ds
            .apply(
                &self.config.ops_namespace,
                PIPELINE_RESOURCE,
                &request.run_name,
                &desired,
                true,
            )
            .await?;
        Ok(stored)
    }

    /// Reconciles the pipeline run and rewires the run graph's owner.
    ///
    /// An existing run is deleted and recreated from the current template so
    /// a new attempt starts instead of mutating an in-flight run; the graph
    /// owner is then pointed at the freshly created run's UID.
    async fn recreate_pipeline_run(
        &self,
        request: &RunRequest,
        run_graph_name: &str,
    ) -> Result<Envelope> {
        let ns = &self.config.ops_namespace;
        let dest_repo = request
            .output
            .clone()
            .filter(|output| !output.is_empty())
            .unwrap_or_else(|| self.config.dest_repo.clone());
        let code_type = if request.code_type.is_empty() {
            "none".to_string()
        } else {
            request.code_type.clone()
        };

        let desired = render(
            PIPELINE_RUN_TPL,
            &Params::new()
                .set("name", request.run_name.clone())
                .set("namespace", ns.clone())
                .set("pipelineName", self.profile.pipeline_name)
                .set("runGraphName", run_graph_name)
                .set("resourceName", request.run_name.clone())
                .set("projectName", request.project.clone())
                .set("projectVersion", request.commit.clone())
                .set("destRepo", dest_repo)
                .set("cacheRepo", self.config.cache_repo.clone())
                .set("codeType", code_type)
                .set("command", request.command.clone()),
        )?;

        let run = match self.ds.get(ns, PIPELINE_RUN, &request.run_name, &[]).await {
            Err(err) if err.is_not_found() => {
                let (run, _) = self
                    .ds
                    .apply(ns, PIPELINE_RUN, &request.run_name, &desired, true)
                    .await?;
                run
            }
            Err(err) => return Err(err),
            Ok(_) => {
                self.ds.delete(ns, PIPELINE_RUN, &request.run_name).await?;
                let (run, _) = self
                    .ds
                    .apply(ns, PIPELINE_RUN, &request.run_name, &desired, true)
                    .await?;
                run
            }
        };

        // The recreation may have changed the run's UID; refresh the graph
        // and point its owner at the live run before anything observes it.
        let mut graph = self.ensure_graph(run_graph_name).await?;
        graph.set_owner(OwnerReference {
            api_version: run.api_version.clone(),
            kind: run.kind.clone(),
            name: run.metadata.name.clone(),
            uid: run.metadata.uid.clone().unwrap_or_default(),
        });
        self.ds
            .apply(ns, FLOW_GRAPH, run_graph_name, &graph, true)
            .await?;

        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use forge_core::{MemoryCluster, ResourceCatalog};
    use serde_json::json;

    async fn harness() -> (Convergence, DataSource) {
        let ds = DataSource::new(
            Arc::new(MemoryCluster::new()),
            Arc::new(ResourceCatalog::builtin(&[])),
        );
        let config = FlowConfig::default();

        // The default service account exists before any intent reconciles.
        let account = Envelope::new("v1", "ServiceAccount", DEFAULT_SERVICE_ACCOUNT, "forge-ops")
            .with_section("secrets", json!([{"name": "default-token"}]));
        ds.apply(
            &config.ops_namespace,
            SERVICE_ACCOUNT,
            DEFAULT_SERVICE_ACCOUNT,
            &account,
            true,
        )
        .await
        .unwrap();

        (
            Convergence::new(ds.clone(), config, CI_PROFILE),
            ds,
        )
    }

    fn request(run_name: &str) -> RunRequest {
        RunRequest {
            run_name: run_name.to_string(),
            project: "app".to_string(),
            git_url: "http://git.example/org/app.git".to_string(),
            branch: "main".to_string(),
            commit: "abc123".to_string(),
            output: None,
            code_type: String::new(),
            command: String::new(),
        }
    }

    #[tokio::test]
    async fn converge_builds_the_full_graph() {
        let (convergence, ds) = harness().await;

        let run = convergence.converge(&request("app-main")).await.unwrap();
        assert_eq!(run.metadata.name, "app-main");

        for (kind, name) in [
            (SECRET, GIT_SECRET_NAME),
            (SECRET, REGISTRY_SECRET_NAME),
            (TASK, CI_PROFILE.task_name),
            (PIPELINE, CI_PROFILE.pipeline_name),
            (FLOW_GRAPH, CI_PROFILE.graph_name),
            (PIPELINE_RESOURCE, "app-main"),
            (FLOW_GRAPH, "forge-build-graph-app-main"),
            (PIPELINE_RUN, "app-main"),
        ] {
            assert!(
                ds.get("forge-ops", kind, name, &[]).await.is_ok(),
                "missing {kind}/{name}"
            );
        }
    }

    #[tokio::test]
    async fn service_account_union_is_additive_and_idempotent() {
        let (convergence, ds) = harness().await;

        convergence.ensure_credentials().await.unwrap();
        convergence.ensure_credentials().await.unwrap();

        let account = ds
            .get("forge-ops", SERVICE_ACCOUNT, DEFAULT_SERVICE_ACCOUNT, &[])
            .await
            .unwrap();
        let names: Vec<String> = account.sections["secrets"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["name"].as_str().unwrap().to_string())
            .collect();

        assert_eq!(
            names,
            vec!["default-token", GIT_SECRET_NAME, REGISTRY_SECRET_NAME]
        );
    }

    #[tokio::test]
    async fn missing_secret_list_is_a_precondition_error() {
        let ds = DataSource::new(
            Arc::new(MemoryCluster::new()),
            Arc::new(ResourceCatalog::builtin(&[])),
        );
        let config = FlowConfig::default();
        let account = Envelope::new("v1", "ServiceAccount", DEFAULT_SERVICE_ACCOUNT, "forge-ops");
        ds.apply(
            &config.ops_namespace,
            SERVICE_ACCOUNT,
            DEFAULT_SERVICE_ACCOUNT,
            &account,
            true,
        )
        .await
        .unwrap();

        let convergence = Convergence::new(ds, config, CI_PROFILE);
        let err = convergence.ensure_credentials().await.unwrap_err();
        assert!(matches!(err, Error::Precondition { .. }));
    }

    #[tokio::test]
    async fn reconverge_recreates_run_and_rewires_owner() {
        let (convergence, ds) = harness().await;

        let first = convergence.converge(&request("app-main")).await.unwrap();
        let first_uid = first.metadata.uid.clone().unwrap();

        let second = convergence.converge(&request("app-main")).await.unwrap();
        let second_uid = second.metadata.uid.clone().unwrap();
        assert_ne!(first_uid, second_uid, "recreation must assign a new uid");

        let graph = ds
            .get("forge-ops", FLOW_GRAPH, "forge-build-graph-app-main", &[])
            .await
            .unwrap();
        assert_eq!(graph.metadata.owner_references.len(), 1);
        assert_eq!(graph.metadata.owner_references[0].uid, second_uid);
        assert_eq!(graph.metadata.owner_references[0].kind, "PipelineRun");
    }

    #[tokio::test]
    async fn converge_is_idempotent_for_shared_resources() {
        let (convergence, ds) = harness().await;

        convergence.converge(&request("app-main")).await.unwrap();
        let task_before = ds
            .get("forge-ops", TASK, CI_PROFILE.task_name, &[])
            .await
            .unwrap();

        convergence.converge(&request("lib-dev")).await.unwrap();
        let task_after = ds
            .get("forge-ops", TASK, CI_PROFILE.task_name, &[])
            .await
            .unwrap();

        // Unchanged template spec means no second write of the task.
        assert_eq!(
            task_before.metadata.resource_version,
            task_after.metadata.resource_version
        );
    }

    #[tokio::test]
    async fn output_override_flows_into_run_params() {
        let (convergence, ds) = harness().await;

        let mut req = request("app-main");
        req.output = Some("registry.example/custom".to_string());
        convergence.converge(&req).await.unwrap();

        let run = ds
            .get("forge-ops", PIPELINE_RUN, "app-main", &[])
            .await
            .unwrap();
        let params = run.spec().unwrap()["params"].as_array().unwrap().clone();
        let dest = params
            .iter()
            .find(|p| p["name"] == "destRepo")
            .unwrap();
        assert_eq!(dest["value"], "registry.example/custom");
    }
}
