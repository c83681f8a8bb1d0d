//! Generic data access over the resource catalog.
//!
//! [`DataSource`] is the lowest-level reusable primitive: List/Get/Apply/
//! Delete/Watch against any catalog kind, addressed by short name. Apply is
//! an upsert with a three-way merge under optimistic concurrency; a version
//! conflict retries the whole get-merge-update cycle with a bounded,
//! jittered backoff. The cluster itself is the consistency boundary, so no
//! in-process locks are involved.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use forge_core::cluster::{ClusterBackend, ListQuery, ObjectList, WatchEvent};
use forge_core::error::Error as CoreError;
use forge_core::object::{Envelope, merge_from_desired};
use forge_core::{ResourceCatalog, RetryPolicy, Selector};

use crate::error::Result;

/// Catalog-addressed cluster operations with apply semantics.
#[derive(Clone)]
pub struct DataSource {
    backend: Arc<dyn ClusterBackend>,
    catalog: Arc<ResourceCatalog>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl DataSource {
    /// Creates a data source over the given backend and catalog.
    #[must_use]
    pub fn new(backend: Arc<dyn ClusterBackend>, catalog: Arc<ResourceCatalog>) -> Self {
        Self {
            backend,
            catalog,
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides the conflict retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the catalog this data source resolves kinds against.
    #[must_use]
    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    /// Lists objects of a kind.
    ///
    /// # Errors
    ///
    /// Fails on unknown kinds and transport errors.
    pub async fn list(&self, namespace: &str, kind: &str, query: &ListQuery) -> Result<ObjectList> {
        let kind_ref = self.catalog.kind_ref(kind)?;
        Ok(self.backend.list(namespace, kind_ref, query).await?)
    }

    /// Reads one object, optionally addressing subresources.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` when absent, otherwise on transport errors.
    pub async fn get(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
        subresources: &[&str],
    ) -> Result<Envelope> {
        let kind_ref = self.catalog.kind_ref(kind)?;
        Ok(self.backend.get(namespace, kind_ref, name, subresources).await?)
    }

    /// Upserts an object with a three-way merge.
    ///
    /// When the named object does not exist it is created verbatim if
    /// `must_create_missing` is set, otherwise the call fails with
    /// `NotFound` (updates of completion fields must not resurrect deleted
    /// intents). When it exists, the desired payload sections overwrite the
    /// stored ones and labels/annotations/owner references merge per
    /// [`merge_from_desired`]; the update runs under optimistic concurrency
    /// and conflicts retry the whole cycle up to the policy's budget.
    ///
    /// Returns the stored object and whether the call updated (vs created).
    ///
    /// # Errors
    ///
    /// Fails with `ConflictExhausted` when the retry budget runs out, or on
    /// transport errors.
    pub async fn apply(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
        desired: &Envelope,
        must_create_missing: bool,
    ) -> Result<(Envelope, bool)> {
        let kind_ref = self.catalog.kind_ref(kind)?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let outcome = match self.backend.get(namespace, kind_ref, name, &[]).await {
                Err(err) if err.is_not_found() => {
                    if !must_create_missing {
                        return Err(err.into());
                    }
                    self.backend
                        .create(namespace, kind_ref, desired)
                        .await
                        .map(|stored| (stored, false))
                }
                Err(err) => return Err(err.into()),
                Ok(mut stored) => {
                    merge_from_desired(&mut stored, desired);
                    self.backend
                        .update(namespace, kind_ref, &stored)
                        .await
                        .map(|stored| (stored, true))
                }
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(err) if err.is_conflict() => {
                    if attempt >= self.retry.attempts {
                        return Err(CoreError::ConflictExhausted {
                            attempts: attempt,
                            kind: kind.to_string(),
                            name: name.to_string(),
                        }
                        .into());
                    }
                    let delay = self.retry.delay(attempt);
                    tracing::debug!(
                        kind,
                        name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "apply conflict; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Deletes an object.
    ///
    /// Conflicts retry like apply; a missing object surfaces as `NotFound`
    /// for the caller to interpret (deleting what is already gone is not an
    /// error for idempotent callers).
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` when absent, `ConflictExhausted` when the retry
    /// budget runs out, or on transport errors.
    pub async fn delete(&self, namespace: &str, kind: &str, name: &str) -> Result<()> {
        let kind_ref = self.catalog.kind_ref(kind)?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.backend.delete(namespace, kind_ref, name).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_conflict() => {
                    if attempt >= self.retry.attempts {
                        return Err(CoreError::ConflictExhausted {
                            attempts: attempt,
                            kind: kind.to_string(),
                            name: name.to_string(),
                        }
                        .into());
                    }
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Opens a watch stream for a kind.
    ///
    /// The stream does not buffer history: callers either re-list before
    /// watching or resume from a previously recorded version. A zero
    /// timeout means no server-side timeout.
    ///
    /// # Errors
    ///
    /// Fails on unknown kinds and transport errors.
    pub async fn watch(
        &self,
        namespace: &str,
        kind: &str,
        from_version: &str,
        timeout: Option<Duration>,
        selector: Selector,
    ) -> Result<mpsc::Receiver<WatchEvent>> {
        let kind_ref = self.catalog.kind_ref(kind)?;
        Ok(self
            .backend
            .watch(namespace, kind_ref, from_version, timeout, selector)
            .await?)
    }
}
