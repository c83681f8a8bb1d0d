//! # forge-flow
//!
//! Intent reconciliation engine for the Forge orchestrator.
//!
//! This crate implements the convergence domain:
//!
//! - **DataSource**: generic List/Get/Apply/Delete/Watch over the catalog,
//!   with three-way merge semantics and bounded conflict retry
//! - **Supervisor**: concurrent long-lived tasks with per-task cancellation
//!   and a shared error sink
//! - **Intent Records**: the typed CI/CD/Unit/Sonar records and their
//!   completion/correlation fields
//! - **Reconcilers**: per-kind state machines turning intent records into
//!   execution-resource graphs and reflecting terminal run conditions back
//!   onto the intent
//! - **Callbacks**: at-least-once result delivery to the submitting caller
//!
//! ## Guarantees
//!
//! - **Idempotent**: every convergence step is an apply; partial
//!   convergence is completed by the next event
//! - **Deterministic names**: a fixed project/branch/kind always derives the
//!   same run name
//! - **Isolated failures**: one intent's failure never stops reconciliation
//!   of another

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod callback;
pub mod conditions;
pub mod config;
pub mod convergence;
pub mod datasource;
pub mod error;
pub mod intent;
pub mod logs;
pub mod naming;
pub mod reconcile;
pub mod supervisor;
pub mod template;

pub use callback::{CallbackPayload, CallbackSink, HttpCallbackSink};
pub use conditions::{Condition, RunOutcome, classify, first_condition};
pub use config::FlowConfig;
pub use convergence::{
    CI_PROFILE, Convergence, PipelineProfile, RunRequest, SONAR_PROFILE, UNIT_PROFILE,
};
pub use datasource::DataSource;
pub use error::{Error, Result};
pub use intent::{
    AckState, ArtifactInfo, CdSpec, CiSpec, Intent, IntentSpec, RequestMeta, SonarSpec, UnitSpec,
};
pub use logs::{ClusterLogCollector, LogCollector};
pub use naming::{extract_project, extract_service, normalize, run_name};
pub use reconcile::{
    CdReconciler, PipelineReconciler, ci_reconciler, sonar_reconciler, unit_reconciler,
};
pub use supervisor::{CancelSignal, ErrorSink, Supervisor};
