//! # forge-core
//!
//! Core abstractions for the Forge intent orchestrator.
//!
//! This crate provides the foundational types and traits used across all
//! Forge components:
//!
//! - **Resource Catalog**: short names to fully-qualified kind identities,
//!   with startup exclusions
//! - **Object Envelope**: typed identity/metadata plus a dynamic payload for
//!   the genuinely schema-free parts of generated resources
//! - **Cluster Backend**: the transport seam, with an in-memory
//!   implementation carrying cluster-like semantics for tests and the
//!   self-contained server mode
//! - **Watch Caches**: per-kind informers serving reads from memory
//! - **Error Types**: the shared failure taxonomy and result alias
//!
//! ## Crate Boundary
//!
//! `forge-core` is the only crate allowed to define shared primitives. The
//! reconciliation engine (`forge-flow`) and the HTTP surface (`forge-api`)
//! build on the seams defined here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod cluster;
pub mod error;
pub mod informer;
pub mod object;
pub mod observability;
pub mod retry;
pub mod selector;

pub use catalog::{KindRef, ResourceCatalog};
pub use cluster::{ClusterBackend, EventKind, ListQuery, MemoryCluster, ObjectList, WatchEvent};
pub use error::{Error, Result};
pub use informer::{WatchCache, wait_or_cancelled};
pub use object::{Envelope, Metadata, OwnerReference, merge_from_desired, same_spec};
pub use observability::{LogFormat, init_logging};
pub use retry::RetryPolicy;
pub use selector::Selector;
