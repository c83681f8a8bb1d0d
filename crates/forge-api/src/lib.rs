//! # forge-api
//!
//! HTTP front door and process bootstrap for the Forge orchestrator.
//!
//! One process serves one intent kind: it binds the creation endpoint
//! (`POST /`), runs the kind's reconciler and completion notifier under the
//! task supervisor, and keeps the catalog's watch-caches warm. The kind is
//! selected by configuration, so a deployment runs one controller per
//! intent kind against the same cluster.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod notifier;
pub mod routes;
pub mod server;

pub use config::{ClusterMode, Config, IntentKind};
pub use error::{ApiError, ApiErrorBody, ApiResult, BootstrapError, BootstrapResult};
pub use notifier::Notifier;
pub use server::{AppState, Server};
