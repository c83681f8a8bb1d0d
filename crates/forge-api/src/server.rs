//! Server assembly: state, router, supervised background tasks.

use std::future::IntoFuture;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use forge_core::ResourceCatalog;
use forge_core::cluster::ClusterBackend;
use forge_core::informer::WatchCache;

use forge_flow::callback::{CallbackSink, HttpCallbackSink};
use forge_flow::config::FlowConfig;
use forge_flow::datasource::DataSource;
use forge_flow::logs::ClusterLogCollector;
use forge_flow::reconcile::{CdReconciler, ci_reconciler, sonar_reconciler, unit_reconciler};
use forge_flow::supervisor::Supervisor;
use forge_flow::intent::{CdSpec, CiSpec, SonarSpec, UnitSpec};

use forge_core::catalog as kinds;

use crate::config::{Config, IntentKind};
use crate::error::{BootstrapError, BootstrapResult};
use crate::notifier::Notifier;
use crate::routes;

/// Shared state for request handlers.
pub struct AppState {
    ds: DataSource,
    config: Config,
    informers: Vec<Arc<WatchCache>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("kind", &self.config.kind)
            .field("informers", &self.informers.len())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// The data source handlers persist intents through.
    #[must_use]
    pub fn ds(&self) -> &DataSource {
        &self.ds
    }

    /// Reconciliation defaults (namespaces, repos, credentials).
    #[must_use]
    pub fn flow(&self) -> &FlowConfig {
        &self.config.flow
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
}

/// Readiness response: informer warm-up state.
#[derive(Debug, Serialize)]
struct ReadyResponse {
    ready: bool,
    cached_kinds: usize,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cached_kinds = state
        .informers
        .iter()
        .filter(|cache| !cache.snapshot().is_empty())
        .count();
    Json(ReadyResponse {
        ready: true,
        cached_kinds,
    })
}

/// One intent controller process: HTTP front door plus supervised watch
/// loops for its kind.
pub struct Server {
    config: Config,
    backend: Arc<dyn ClusterBackend>,
    catalog: Arc<ResourceCatalog>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("kind", &self.config.kind)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a server over the given backend.
    #[must_use]
    pub fn new(config: Config, backend: Arc<dyn ClusterBackend>) -> Self {
        let excluded: Vec<&str> = config.excluded_kinds.iter().map(String::as_str).collect();
        let catalog = Arc::new(ResourceCatalog::builtin(&excluded));
        Self {
            config,
            backend,
            catalog,
        }
    }

    /// The data source bound to this server's backend and catalog.
    #[must_use]
    pub fn datasource(&self) -> DataSource {
        DataSource::new(Arc::clone(&self.backend), Arc::clone(&self.catalog))
    }

    /// Builds the application state, including per-kind informers.
    fn build_state(&self) -> Arc<AppState> {
        let informers = self
            .catalog
            .names()
            .filter_map(|name| self.catalog.kind_ref(name).ok())
            .map(|kind| Arc::new(WatchCache::new(Arc::clone(&self.backend), kind.clone())))
            .collect();

        Arc::new(AppState {
            ds: self.datasource(),
            config: self.config.clone(),
            informers,
        })
    }

    /// Builds the router for this controller's kind.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router_with_state(self.build_state())
    }

    fn router_with_state(&self, state: Arc<AppState>) -> Router {
        let create = match self.config.kind {
            IntentKind::Ci => post(routes::ci::create),
            IntentKind::Cd => post(routes::cd::create),
            IntentKind::Unit => post(routes::unit::create),
            IntentKind::Sonar => post(routes::sonar::create),
        };

        Router::new()
            .route("/", create)
            .route("/health", get(health))
            .route("/ready", get(ready))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Registers this kind's informers, reconciler and notifier.
    fn register_tasks(
        &self,
        supervisor: &mut Supervisor,
        state: &Arc<AppState>,
        sink: Arc<dyn CallbackSink>,
    ) -> BootstrapResult<()> {
        for cache in &state.informers {
            let cache = Arc::clone(cache);
            supervisor
                .add(move |cancel, _errors| async move {
                    if let Err(err) = cache.run(cancel).await {
                        tracing::error!(error = %err, "informer stopped");
                    }
                })
                .map_err(|err| BootstrapError::new(err.to_string()))?;
        }

        let ds = self.datasource();
        let flow = self.config.flow.clone();

        match self.config.kind {
            IntentKind::Ci => {
                let reconciler = ci_reconciler(ds.clone(), flow.clone());
                supervisor
                    .add(move |cancel, errors| reconciler.run(cancel, errors))
                    .map_err(|err| BootstrapError::new(err.to_string()))?;

                let notifier: Notifier<CiSpec> =
                    Notifier::new("ci", kinds::CI, ds, flow, sink);
                supervisor
                    .add(move |cancel, errors| notifier.run(cancel, errors))
                    .map_err(|err| BootstrapError::new(err.to_string()))?;
            }
            IntentKind::Cd => {
                let reconciler = CdReconciler::new(ds.clone(), flow.clone());
                supervisor
                    .add(move |cancel, errors| reconciler.run(cancel, errors))
                    .map_err(|err| BootstrapError::new(err.to_string()))?;

                let notifier: Notifier<CdSpec> =
                    Notifier::new("cd", kinds::CD, ds, flow, sink);
                supervisor
                    .add(move |cancel, errors| notifier.run(cancel, errors))
                    .map_err(|err| BootstrapError::new(err.to_string()))?;
            }
            IntentKind::Unit => {
                let reconciler = unit_reconciler(ds.clone(), flow.clone());
                supervisor
                    .add(move |cancel, errors| reconciler.run(cancel, errors))
                    .map_err(|err| BootstrapError::new(err.to_string()))?;

                let logs = Arc::new(ClusterLogCollector::new(ds.clone(), flow.clone()));
                let notifier: Notifier<UnitSpec> =
                    Notifier::new("unit", kinds::UNIT, ds, flow, sink)
                        .with_log_collector(logs);
                supervisor
                    .add(move |cancel, errors| notifier.run(cancel, errors))
                    .map_err(|err| BootstrapError::new(err.to_string()))?;
            }
            IntentKind::Sonar => {
                let reconciler = sonar_reconciler(ds.clone(), flow.clone());
                supervisor
                    .add(move |cancel, errors| reconciler.run(cancel, errors))
                    .map_err(|err| BootstrapError::new(err.to_string()))?;

                let notifier: Notifier<SonarSpec> =
                    Notifier::new("sonar", kinds::SONAR, ds, flow, sink);
                supervisor
                    .add(move |cancel, errors| notifier.run(cancel, errors))
                    .map_err(|err| BootstrapError::new(err.to_string()))?;
            }
        }

        Ok(())
    }

    /// Starts the supervised tasks and serves HTTP until a fatal error.
    ///
    /// The first error reported by a supervised task ends the process; the
    /// orchestrating platform restarts it.
    ///
    /// # Errors
    ///
    /// Fails when the listener cannot bind, the server errors, or a
    /// supervised task reports a terminal failure.
    pub async fn serve(self) -> BootstrapResult<()> {
        let state = self.build_state();
        let sink: Arc<dyn CallbackSink> =
            Arc::new(HttpCallbackSink::new(self.config.callback_url.clone()));

        let mut supervisor = Supervisor::new();
        self.register_tasks(&mut supervisor, &state, sink)?;
        let mut errors = supervisor
            .start()
            .map_err(|err| BootstrapError::new(err.to_string()))?;

        let router = self.router_with_state(state);
        let listener = tokio::net::TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|err| {
                BootstrapError::new(format!("bind {} failed: {err}", self.config.listen_addr))
            })?;

        tracing::info!(
            kind = self.config.kind.as_str(),
            addr = %self.config.listen_addr,
            "forge controller serving"
        );

        tokio::select! {
            result = axum::serve(listener, router).into_future() => {
                supervisor.stop();
                result.map_err(|err| BootstrapError::new(format!("server error: {err}")))
            }
            err = errors.recv() => {
                supervisor.stop();
                match err {
                    Some(err) => Err(BootstrapError::new(format!("supervised task failed: {err}"))),
                    None => Err(BootstrapError::new("error sink closed unexpectedly")),
                }
            }
        }
    }
}
