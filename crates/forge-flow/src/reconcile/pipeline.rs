//! The pipeline-driving reconciler shared by CI, Unit and Sonar intents.

use forge_core::catalog::{self, PIPELINE_RUN};
use forge_core::cluster::EventKind;
use forge_core::object::Envelope;
use forge_core::{Selector, wait_or_cancelled};

use crate::conditions::{RunOutcome, classify};
use crate::config::FlowConfig;
use crate::convergence::{
    CI_PROFILE, Convergence, RunRequest, SONAR_PROFILE, UNIT_PROFILE,
};
use crate::datasource::DataSource;
use crate::error::{Error, Result};
use crate::intent::{AckState, CiSpec, Intent, IntentSpec, SonarSpec, UnitSpec};
use crate::naming::{extract_project, normalize, run_name};
use crate::reconcile::{RECONNECT_DELAY, complete_intent, is_unrecoverable};
use crate::supervisor::{CancelSignal, ErrorSink};

/// Builds the per-run request from an intent record.
type ToRequest<S> = fn(&Intent<S>) -> Result<RunRequest>;

/// Reconciler for one pipeline-driven intent kind.
pub struct PipelineReconciler<S: IntentSpec> {
    label: &'static str,
    intent_kind: &'static str,
    ds: DataSource,
    convergence: Convergence,
    config: FlowConfig,
    to_request: ToRequest<S>,
}

impl<S: IntentSpec> std::fmt::Debug for PipelineReconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineReconciler")
            .field("kind", &self.intent_kind)
            .finish_non_exhaustive()
    }
}

/// Creates the CI reconciler.
#[must_use]
pub fn ci_reconciler(ds: DataSource, config: FlowConfig) -> PipelineReconciler<CiSpec> {
    PipelineReconciler {
        label: "ci",
        intent_kind: catalog::CI,
        convergence: Convergence::new(ds.clone(), config.clone(), CI_PROFILE),
        ds,
        config,
        to_request: |intent| {
            let spec = &intent.spec;
            let git_url = required(&spec.git_url, "gitUrl")?;
            let branch = required(&spec.branch, "branch")?;
            let project = extract_project(&git_url)?;
            Ok(RunRequest {
                run_name: run_name(&[&project, &branch], CI_PROFILE.run_suffix),
                project,
                git_url,
                branch,
                commit: spec.commit_id.clone().unwrap_or_default(),
                output: spec.output.clone(),
                code_type: spec.code_type.clone(),
                command: String::new(),
            })
        },
    }
}

/// Creates the unit-test reconciler.
#[must_use]
pub fn unit_reconciler(ds: DataSource, config: FlowConfig) -> PipelineReconciler<UnitSpec> {
    PipelineReconciler {
        label: "unit",
        intent_kind: catalog::UNIT,
        convergence: Convergence::new(ds.clone(), config.clone(), UNIT_PROFILE),
        ds,
        config,
        to_request: |intent| {
            let spec = &intent.spec;
            let git_url = required(&spec.git_url, "gitUrl")?;
            let branch = required(&spec.branch, "branch")?;
            let project = extract_project(&git_url)?;
            Ok(RunRequest {
                // The intent name was derived (and suffixed) at creation.
                run_name: normalize(&intent.metadata.name),
                project,
                git_url,
                branch,
                commit: String::new(),
                output: None,
                code_type: spec.language.clone().unwrap_or_default(),
                command: spec.command.clone().unwrap_or_default(),
            })
        },
    }
}

/// Creates the sonar-scan reconciler.
#[must_use]
pub fn sonar_reconciler(ds: DataSource, config: FlowConfig) -> PipelineReconciler<SonarSpec> {
    PipelineReconciler {
        label: "sonar",
        intent_kind: catalog::SONAR,
        convergence: Convergence::new(ds.clone(), config.clone(), SONAR_PROFILE),
        ds,
        config,
        to_request: |intent| {
            let spec = &intent.spec;
            let git_url = required(&spec.git_url, "gitUrl")?;
            let branch = required(&spec.branch, "branch")?;
            let project = extract_project(&git_url)?;
            Ok(RunRequest {
                run_name: normalize(&intent.metadata.name),
                project,
                git_url,
                branch,
                commit: String::new(),
                output: None,
                code_type: spec.language.clone().unwrap_or_default(),
                command: String::new(),
            })
        },
    }
}

fn required(field: &Option<String>, name: &str) -> Result<String> {
    field
        .clone()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::precondition(format!("intent spec field {name} is missing")))
}

impl<S: IntentSpec + 'static> PipelineReconciler<S> {
    /// Runs the dispatch loop until cancellation.
    pub async fn run(self, mut cancel: CancelSignal, errors: ErrorSink) {
        let mut intent_version = String::from("0");
        let mut run_version = String::from("0");

        'watch: loop {
            let mut intent_stream = match self
                .ds
                .watch(
                    &self.config.intent_namespace,
                    self.intent_kind,
                    &intent_version,
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

            let mut run_stream = match self
                .ds
                .watch(
                    &self.config.ops_namespace,
                    PIPELINE_RUN,
                    &run_version,
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

            tracing::info!(
                service = self.label,
                "watching intent and pipeline-run channels"
            );

            loop {
                tokio::select! {
                    _ = cancel.changed() => {
                        tracing::info!(service = self.label, "reconciler stopping");
                        return;
                    }
                    event = intent_stream.recv() => match event {
                        Some(event) => {
                            if event.kind == EventKind::Deleted {
                                continue;
                            }
                            if let Err(err) = self.reconcile_intent(&event.object).await {
                                tracing::warn!(
                                    service = self.label,
                                    name = %event.object.metadata.name,
                                    error = %err,
                                    "intent reconciliation failed; event dropped"
                                );
                            }
                            if let Some(version) = &event.object.metadata.resource_version {
                                intent_version = version.clone();
                            }
                        }
                        None => {
                            tracing::warn!(service = self.label, "intent channel closed");
                            break;
                        }
                    },
                    event = run_stream.recv() => match event {
                        Some(event) => {
                            if event.kind == EventKind::Deleted {
                                continue;
                            }
                            if let Err(err) = self.reconcile_run(&event.object).await {
                                tracing::warn!(
                                    service = self.label,
                                    name = %event.object.metadata.name,
                                    error = %err,
                                    "pipeline-run reconciliation failed; event dropped"
                                );
                            }
                            if let Some(version) = &event.object.metadata.resource_version {
                                run_version = version.clone();
                            }
                        }
                        None => {
                            tracing::warn!(service = self.label, "pipeline-run channel closed");
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

    /// Returns true when the loop should stop.
    async fn report_or_retry(
        &self,
        err: &Error,
        errors: &ErrorSink,
        cancel: &mut CancelSignal,
    ) -> bool {
        if is_unrecoverable(err) {
            tracing::error!(service = self.label, error = %err, "unrecoverable watch error");
            let _ = errors
                .send(Error::precondition(format!(
                    "{} reconciler stopped: {err}",
                    self.label
                )))
                .await;
            return true;
        }
        tracing::warn!(service = self.label, error = %err, "watch failed; retrying");
        wait_or_cancelled(cancel, RECONNECT_DELAY).await
    }

    /// Converges the execution-resource graph for a not-yet-done intent.
    async fn reconcile_intent(&self, envelope: &Envelope) -> Result<()> {
        let intent: Intent<S> = Intent::from_envelope(envelope)?;
        if intent.spec.meta().done {
            return Ok(());
        }

        let request = (self.to_request)(&intent)?;
        self.convergence.converge(&request).await?;
        Ok(())
    }

    /// Reflects a terminal pipeline-run condition onto the owning intent.
    async fn reconcile_run(&self, run: &Envelope) -> Result<()> {
        let outcome = match classify(run) {
            RunOutcome::Pending => return Ok(()),
            RunOutcome::Succeeded => AckState::Success,
            RunOutcome::Failed => AckState::Fail,
        };

        // Run name and intent name coincide by construction; a run that is
        // not ours has no intent record and surfaces as not-found.
        complete_intent::<S>(
            &self.ds,
            &self.config.intent_namespace,
            self.intent_kind,
            &run.metadata.name,
            outcome,
        )
        .await
    }
}
