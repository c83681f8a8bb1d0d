//! Background watch-caches ("informers") for catalog kinds.
//!
//! One [`WatchCache`] per registered kind keeps a name-indexed snapshot of
//! the cluster warm from a watch stream, so read-heavy callers are served
//! from memory. The cache loop is a long-lived supervised task: a closed
//! stream is re-established from the last seen version after a short delay,
//! indefinitely.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;

use crate::cluster::{ClusterBackend, EventKind, ListQuery};
use crate::catalog::KindRef;
use crate::error::{Error, Result};
use crate::object::Envelope;
use crate::selector::Selector;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// A per-kind read cache fed by a watch stream.
pub struct WatchCache {
    backend: Arc<dyn ClusterBackend>,
    kind: KindRef,
    state: RwLock<HashMap<(String, String), Envelope>>,
}

impl std::fmt::Debug for WatchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchCache")
            .field("kind", &self.kind.plural)
            .finish_non_exhaustive()
    }
}

impl WatchCache {
    /// Creates a cache for one kind over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn ClusterBackend>, kind: KindRef) -> Self {
        Self {
            backend,
            kind,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached object, if the cache has seen it.
    #[must_use]
    pub fn get(&self, namespace: &str, name: &str) -> Option<Envelope> {
        self.state
            .read()
            .ok()?
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Returns a snapshot of every cached object of this kind.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Envelope> {
        self.state
            .read()
            .map(|state| state.values().cloned().collect())
            .unwrap_or_default()
    }

    fn replace(&self, items: Vec<Envelope>) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| Error::internal("watch cache lock poisoned"))?;
        state.clear();
        for item in items {
            let namespace = item.metadata.namespace.clone().unwrap_or_default();
            state.insert((namespace, item.metadata.name.clone()), item);
        }
        Ok(())
    }

    fn apply(&self, kind: EventKind, object: Envelope) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| Error::internal("watch cache lock poisoned"))?;
        let key = (
            object.metadata.namespace.clone().unwrap_or_default(),
            object.metadata.name.clone(),
        );
        match kind {
            EventKind::Added | EventKind::Modified => {
                state.insert(key, object);
            }
            EventKind::Deleted => {
                state.remove(&key);
            }
        }
        Ok(())
    }

    /// Runs the cache loop until cancellation.
    ///
    /// Warms from a list, records the list version, then consumes the watch
    /// stream; a closed stream reconnects from the last seen version after a
    /// short delay.
    ///
    /// # Errors
    ///
    /// Only internal state errors terminate the loop; transport failures are
    /// logged and retried.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> Result<()> {
        let mut checkpoint = String::from("0");

        loop {
            match self.backend.list("", &self.kind, &ListQuery::default()).await {
                Ok(list) => {
                    checkpoint = list.resource_version.clone();
                    self.replace(list.items)?;
                }
                Err(err) => {
                    tracing::warn!(kind = %self.kind.plural, error = %err, "informer list failed");
                    if wait_or_cancelled(&mut cancel, RECONNECT_DELAY).await {
                        return Ok(());
                    }
                    continue;
                }
            }

            let mut stream = match self
                .backend
                .watch("", &self.kind, &checkpoint, None, Selector::All)
                .await
            {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(kind = %self.kind.plural, error = %err, "informer watch failed");
                    if wait_or_cancelled(&mut cancel, RECONNECT_DELAY).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    _ = cancel.changed() => return Ok(()),
                    event = stream.recv() => match event {
                        Some(event) => {
                            if let Some(version) = &event.object.metadata.resource_version {
                                checkpoint = version.clone();
                            }
                            self.apply(event.kind, event.object)?;
                        }
                        None => break,
                    },
                }
            }

            tracing::debug!(kind = %self.kind.plural, "informer stream closed; reconnecting");
            if wait_or_cancelled(&mut cancel, RECONNECT_DELAY).await {
                return Ok(());
            }
        }
    }
}

/// Sleeps for `delay`, returning `true` if cancellation arrived first.
pub async fn wait_or_cancelled(cancel: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.changed() => true,
        () = tokio::time::sleep(delay) => false,
    }
}
