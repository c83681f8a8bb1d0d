//! Cluster access abstraction.
//!
//! [`ClusterBackend`] is the transport seam: "list/get/create/update/delete/
//! watch typed-by-name resources in a namespace". Production deployments
//! plug a real transport in behind this trait; [`MemoryCluster`] implements
//! it in process with cluster-like semantics (monotonic resource versions,
//! optimistic-concurrency update, uid assignment on create, resumable watch
//! streams) and backs both the test suites and the self-contained server
//! mode.
//!
//! The version token is an opaque string to the callers; the in-memory
//! backend uses a global monotonic counter rendered in decimal so watch
//! resumption can order events.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::catalog::KindRef;
use crate::error::{Error, Result};
use crate::object::Envelope;
use crate::selector::Selector;

/// What happened to the object a watch event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The object was created.
    Added,
    /// The object was updated.
    Modified,
    /// The object was deleted.
    Deleted,
}

/// One event on a watch stream.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// What happened.
    pub kind: EventKind,
    /// The object after the change (before, for deletions).
    pub object: Envelope,
}

/// Pagination and filtering for a list call.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Opaque continuation token from a previous page.
    pub continue_token: Option<String>,
    /// Offset into the result set.
    pub offset: u64,
    /// Maximum items to return; zero means no limit.
    pub limit: u64,
    /// Label selector.
    pub selector: Selector,
}

/// A page of objects plus the version the page was read at.
#[derive(Debug, Clone)]
pub struct ObjectList {
    /// Version token to resume a watch from without a gap.
    pub resource_version: String,
    /// The objects.
    pub items: Vec<Envelope>,
}

/// Typed-by-name resource access in a namespace.
///
/// An empty namespace addresses all namespaces where the operation allows it
/// (list and watch).
#[async_trait]
pub trait ClusterBackend: Send + Sync + 'static {
    /// Lists objects of a kind.
    async fn list(&self, namespace: &str, kind: &KindRef, query: &ListQuery)
        -> Result<ObjectList>;

    /// Reads one object, optionally addressing a subresource.
    ///
    /// Returns `Error::NotFound` when the object does not exist.
    async fn get(
        &self,
        namespace: &str,
        kind: &KindRef,
        name: &str,
        subresources: &[&str],
    ) -> Result<Envelope>;

    /// Creates an object. Fails with `Error::Conflict` when it exists.
    async fn create(&self, namespace: &str, kind: &KindRef, object: &Envelope)
        -> Result<Envelope>;

    /// Updates an object under optimistic concurrency.
    ///
    /// The object's `metadata.resource_version` must match the stored
    /// version; a mismatch returns `Error::Conflict` with the current token.
    async fn update(&self, namespace: &str, kind: &KindRef, object: &Envelope)
        -> Result<Envelope>;

    /// Deletes an object. Returns `Error::NotFound` when absent.
    async fn delete(&self, namespace: &str, kind: &KindRef, name: &str) -> Result<()>;

    /// Opens a watch stream.
    ///
    /// Events recorded after `from_version` (exclusive) are replayed first,
    /// then live events follow. The stream does not buffer unbounded
    /// history on behalf of slow consumers; a lagging consumer sees the
    /// stream close and must re-list or resume from its checkpoint. An
    /// optional server-side timeout closes the stream when it elapses.
    async fn watch(
        &self,
        namespace: &str,
        kind: &KindRef,
        from_version: &str,
        timeout: Option<Duration>,
        selector: Selector,
    ) -> Result<mpsc::Receiver<WatchEvent>>;
}

const WATCH_CHANNEL_CAPACITY: usize = 64;
const LIVE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct LogEntry {
    version: u64,
    plural: String,
    namespace: String,
    event: WatchEvent,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<(String, String, String), Envelope>,
    version: u64,
    log: Vec<LogEntry>,
}

/// In-memory cluster backend.
///
/// Thread-safe via a mutex; suitable for tests and the self-contained
/// server mode, not for multi-process deployments.
pub struct MemoryCluster {
    inner: Mutex<Inner>,
    live: broadcast::Sender<LogEntry>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCluster").finish_non_exhaustive()
    }
}

impl MemoryCluster {
    /// Creates an empty in-memory cluster.
    #[must_use]
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            live,
        }
    }

    fn key(kind: &KindRef, namespace: &str, name: &str) -> (String, String, String) {
        (kind.plural.clone(), namespace.to_string(), name.to_string())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::internal("cluster state lock poisoned"))
    }

    fn record(
        inner: &mut Inner,
        live: &broadcast::Sender<LogEntry>,
        kind: &KindRef,
        namespace: &str,
        event: WatchEvent,
    ) {
        let entry = LogEntry {
            version: inner.version,
            plural: kind.plural.clone(),
            namespace: namespace.to_string(),
            event,
        };
        inner.log.push(entry.clone());
        // No receivers is fine; the log still serves replays.
        let _ = live.send(entry);
    }

    fn parse_version(token: &str) -> u64 {
        token.parse().unwrap_or(0)
    }
}

#[async_trait]
impl ClusterBackend for MemoryCluster {
    async fn list(
        &self,
        namespace: &str,
        kind: &KindRef,
        query: &ListQuery,
    ) -> Result<ObjectList> {
        let inner = self.lock()?;

        let mut items: Vec<Envelope> = inner
            .objects
            .iter()
            .filter(|((plural, ns, _), _)| {
                plural == &kind.plural && (namespace.is_empty() || ns == namespace)
            })
            .map(|(_, obj)| obj.clone())
            .filter(|obj| query.selector.matches(&obj.metadata.labels))
            .collect();
        items.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

        if query.limit > 0 {
            items.truncate(usize::try_from(query.offset + query.limit).unwrap_or(usize::MAX));
        }

        Ok(ObjectList {
            resource_version: inner.version.to_string(),
            items,
        })
    }

    async fn get(
        &self,
        namespace: &str,
        kind: &KindRef,
        name: &str,
        _subresources: &[&str],
    ) -> Result<Envelope> {
        // Subresources are stored inline on the parent object here; a real
        // transport addresses them as separate endpoints.
        let inner = self.lock()?;
        inner
            .objects
            .get(&Self::key(kind, namespace, name))
            .cloned()
            .ok_or_else(|| Error::not_found(&kind.plural, name))
    }

    async fn create(
        &self,
        namespace: &str,
        kind: &KindRef,
        object: &Envelope,
    ) -> Result<Envelope> {
        let mut inner = self.lock()?;
        let key = Self::key(kind, namespace, &object.metadata.name);

        if let Some(existing) = inner.objects.get(&key) {
            return Err(Error::Conflict {
                current: existing
                    .metadata
                    .resource_version
                    .clone()
                    .unwrap_or_default(),
            });
        }

        inner.version += 1;
        let mut stored = object.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.uid = Some(ulid::Ulid::new().to_string());
        stored.metadata.resource_version = Some(inner.version.to_string());
        stored.metadata.creation_timestamp = Some(chrono::Utc::now());
        inner.objects.insert(key, stored.clone());

        Self::record(
            &mut inner,
            &self.live,
            kind,
            namespace,
            WatchEvent {
                kind: EventKind::Added,
                object: stored.clone(),
            },
        );

        Ok(stored)
    }

    async fn update(
        &self,
        namespace: &str,
        kind: &KindRef,
        object: &Envelope,
    ) -> Result<Envelope> {
        let mut inner = self.lock()?;
        let key = Self::key(kind, namespace, &object.metadata.name);

        let current = inner
            .objects
            .get(&key)
            .ok_or_else(|| Error::not_found(&kind.plural, &object.metadata.name))?
            .metadata
            .resource_version
            .clone()
            .unwrap_or_default();

        if object.metadata.resource_version.as_deref() != Some(current.as_str()) {
            return Err(Error::Conflict { current });
        }

        inner.version += 1;
        let mut stored = object.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(inner.version.to_string());
        inner.objects.insert(key, stored.clone());

        Self::record(
            &mut inner,
            &self.live,
            kind,
            namespace,
            WatchEvent {
                kind: EventKind::Modified,
                object: stored.clone(),
            },
        );

        Ok(stored)
    }

    async fn delete(&self, namespace: &str, kind: &KindRef, name: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let key = Self::key(kind, namespace, name);

        let Some(removed) = inner.objects.remove(&key) else {
            return Err(Error::not_found(&kind.plural, name));
        };

        inner.version += 1;
        Self::record(
            &mut inner,
            &self.live,
            kind,
            namespace,
            WatchEvent {
                kind: EventKind::Deleted,
                object: removed,
            },
        );

        Ok(())
    }

    async fn watch(
        &self,
        namespace: &str,
        kind: &KindRef,
        from_version: &str,
        timeout: Option<Duration>,
        selector: Selector,
    ) -> Result<mpsc::Receiver<WatchEvent>> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let from = Self::parse_version(from_version);

        // Subscribe under the lock so no event falls between the replay
        // snapshot and the live stream.
        let (backlog, mut live) = {
            let inner = self.lock()?;
            let backlog: Vec<LogEntry> = inner
                .log
                .iter()
                .filter(|entry| entry.version > from)
                .cloned()
                .collect();
            (backlog, self.live.subscribe())
        };

        let plural = kind.plural.clone();
        let namespace = namespace.to_string();
        let matches = move |entry: &LogEntry| {
            entry.plural == plural
                && (namespace.is_empty() || entry.namespace == namespace)
                && selector.matches(&entry.event.object.metadata.labels)
        };

        tokio::spawn(async move {
            let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
            let mut last_sent = from;

            for entry in backlog {
                if matches(&entry) {
                    if tx.send(entry.event.clone()).await.is_err() {
                        return;
                    }
                    last_sent = entry.version;
                }
            }

            loop {
                let received = match deadline {
                    Some(deadline) => {
                        match tokio::time::timeout_at(deadline, live.recv()).await {
                            Ok(received) => received,
                            // Server-side timeout: close the stream.
                            Err(_) => return,
                        }
                    }
                    None => live.recv().await,
                };

                match received {
                    Ok(entry) => {
                        if entry.version <= last_sent || !matches(&entry) {
                            continue;
                        }
                        last_sent = entry.version;
                        if tx.send(entry.event).await.is_err() {
                            return;
                        }
                    }
                    // Lagged consumers get a closed stream and re-list.
                    Err(broadcast::error::RecvError::Lagged(_))
                    | Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CI, ResourceCatalog};
    use serde_json::json;

    fn catalog() -> ResourceCatalog {
        ResourceCatalog::builtin(&[])
    }

    fn ci_object(name: &str) -> Envelope {
        Envelope::new("forge.dev/v1", "CI", name, "forge")
            .with_section("spec", json!({"gitUrl": "http://git.example/org/app.git"}))
    }

    #[tokio::test]
    async fn create_assigns_uid_and_version() {
        let cluster = MemoryCluster::new();
        let catalog = catalog();
        let kind = catalog.kind_ref(CI).unwrap();

        let stored = cluster.create("forge", kind, &ci_object("app-main")).await.unwrap();
        assert!(stored.metadata.uid.is_some());
        assert_eq!(stored.metadata.resource_version.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn create_on_existing_is_conflict() {
        let cluster = MemoryCluster::new();
        let catalog = catalog();
        let kind = catalog.kind_ref(CI).unwrap();

        cluster.create("forge", kind, &ci_object("app-main")).await.unwrap();
        let err = cluster
            .create("forge", kind, &ci_object("app-main"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_requires_matching_version() {
        let cluster = MemoryCluster::new();
        let catalog = catalog();
        let kind = catalog.kind_ref(CI).unwrap();

        let stored = cluster.create("forge", kind, &ci_object("app-main")).await.unwrap();

        let mut stale = stored.clone();
        stale.metadata.resource_version = Some("0".into());
        let err = cluster.update("forge", kind, &stale).await.unwrap_err();
        assert!(err.is_conflict());

        let updated = cluster.update("forge", kind, &stored).await.unwrap();
        assert_eq!(updated.metadata.resource_version.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let cluster = MemoryCluster::new();
        let catalog = catalog();
        let kind = catalog.kind_ref(CI).unwrap();

        let err = cluster.delete("forge", kind, "ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn watch_replays_then_streams() {
        let cluster = MemoryCluster::new();
        let catalog = catalog();
        let kind = catalog.kind_ref(CI).unwrap();

        cluster.create("forge", kind, &ci_object("first")).await.unwrap();

        let mut rx = cluster
            .watch("forge", kind, "0", None, Selector::All)
            .await
            .unwrap();

        let replayed = rx.recv().await.unwrap();
        assert_eq!(replayed.kind, EventKind::Added);
        assert_eq!(replayed.object.metadata.name, "first");

        cluster.create("forge", kind, &ci_object("second")).await.unwrap();
        let live = rx.recv().await.unwrap();
        assert_eq!(live.object.metadata.name, "second");
    }

    #[tokio::test]
    async fn watch_from_checkpoint_skips_seen_events() {
        let cluster = MemoryCluster::new();
        let catalog = catalog();
        let kind = catalog.kind_ref(CI).unwrap();

        let first = cluster.create("forge", kind, &ci_object("first")).await.unwrap();
        cluster.create("forge", kind, &ci_object("second")).await.unwrap();

        let checkpoint = first.metadata.resource_version.unwrap();
        let mut rx = cluster
            .watch("forge", kind, &checkpoint, None, Selector::All)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.object.metadata.name, "second");
    }

    #[tokio::test]
    async fn watch_filters_namespace_and_selector() {
        let cluster = MemoryCluster::new();
        let catalog = catalog();
        let kind = catalog.kind_ref(CI).unwrap();

        let mut labelled = ci_object("labelled");
        labelled
            .metadata
            .labels
            .insert("team".into(), "build".into());
        cluster.create("forge", kind, &labelled).await.unwrap();
        cluster.create("other", kind, &ci_object("elsewhere")).await.unwrap();

        let mut rx = cluster
            .watch("forge", kind, "0", None, Selector::label("team", "build"))
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.object.metadata.name, "labelled");

        // Cross-namespace watch with empty namespace sees both.
        let mut all = cluster
            .watch("", kind, "0", None, Selector::All)
            .await
            .unwrap();
        let mut names = vec![
            all.recv().await.unwrap().object.metadata.name,
            all.recv().await.unwrap().object.metadata.name,
        ];
        names.sort();
        assert_eq!(names, vec!["elsewhere", "labelled"]);
    }

    #[tokio::test]
    async fn watch_timeout_closes_stream() {
        let cluster = MemoryCluster::new();
        let catalog = catalog();
        let kind = catalog.kind_ref(CI).unwrap();

        let mut rx = cluster
            .watch(
                "forge",
                kind,
                "0",
                Some(Duration::from_millis(10)),
                Selector::All,
            )
            .await
            .unwrap();

        assert!(rx.recv().await.is_none());
    }
}
