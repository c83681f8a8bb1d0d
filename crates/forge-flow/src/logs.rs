//! Run log collection for unit-test callbacks.

use async_trait::async_trait;
use serde_json::Value;

use forge_core::catalog::{PIPELINE_RUN, POD};

use crate::config::FlowConfig;
use crate::datasource::DataSource;
use crate::error::Result;

/// Container whose log is collected for the unit callback.
const STEP_CONTAINER: &str = "step-step2";

/// Collects the log text of a finished run.
#[async_trait]
pub trait LogCollector: Send + Sync {
    /// Returns the run's step log; empty when unavailable.
    async fn collect(&self, run_name: &str) -> Result<String>;
}

/// Collects logs from the cluster: resolves the run's pod, then reads the
/// pod log subresource.
pub struct ClusterLogCollector {
    ds: DataSource,
    config: FlowConfig,
}

impl std::fmt::Debug for ClusterLogCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterLogCollector").finish_non_exhaustive()
    }
}

impl ClusterLogCollector {
    /// Creates a collector over the given data source.
    #[must_use]
    pub fn new(ds: DataSource, config: FlowConfig) -> Self {
        Self { ds, config }
    }
}

#[async_trait]
impl LogCollector for ClusterLogCollector {
    async fn collect(&self, run_name: &str) -> Result<String> {
        let run = self
            .ds
            .get(&self.config.ops_namespace, PIPELINE_RUN, run_name, &[])
            .await?;

        let Some(pod_name) = first_pod_name(run.sections.get("status")) else {
            return Ok(String::new());
        };

        let pod = self
            .ds
            .get(
                &self.config.ops_namespace,
                POD,
                &pod_name,
                &["log", STEP_CONTAINER],
            )
            .await?;

        Ok(pod
            .sections
            .get("log")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

/// Reads the first task-run pod name off a run's status.
fn first_pod_name(status: Option<&Value>) -> Option<String> {
    let task_runs = status?.get("taskRuns")?.as_object()?;
    task_runs
        .values()
        .find_map(|task_run| task_run.get("status")?.get("podName")?.as_str())
        .map(str::to_string)
}
