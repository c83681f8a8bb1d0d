//! Completion notifiers: watch intents, report results to the caller.
//!
//! One notifier per intent kind lists existing intents (so completions that
//! landed while the process was down are still delivered — at-least-once),
//! records the list version, then watches from it. Every observation of a
//! terminal intent posts the flattened payload; a failed delivery is logged
//! and retried on the next observation.

use std::marker::PhantomData;
use std::sync::Arc;

use forge_core::cluster::{EventKind, ListQuery};
use forge_core::object::Envelope;
use forge_core::{Selector, wait_or_cancelled};

use forge_flow::callback::{CallbackPayload, CallbackSink};
use forge_flow::config::FlowConfig;
use forge_flow::datasource::DataSource;
use forge_flow::error::Error as FlowError;
use forge_flow::intent::{Intent, IntentSpec};
use forge_flow::logs::LogCollector;
use forge_flow::reconcile::RECONNECT_DELAY;
use forge_flow::supervisor::{CancelSignal, ErrorSink};

/// Watches one intent kind and posts completion callbacks.
pub struct Notifier<S: IntentSpec> {
    label: &'static str,
    kind: &'static str,
    ds: DataSource,
    flow: FlowConfig,
    sink: Arc<dyn CallbackSink>,
    logs: Option<Arc<dyn LogCollector>>,
    _spec: PhantomData<fn() -> S>,
}

impl<S: IntentSpec> std::fmt::Debug for Notifier<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<S: IntentSpec + 'static> Notifier<S> {
    /// Creates a notifier for one intent kind.
    #[must_use]
    pub fn new(
        label: &'static str,
        kind: &'static str,
        ds: DataSource,
        flow: FlowConfig,
        sink: Arc<dyn CallbackSink>,
    ) -> Self {
        Self {
            label,
            kind,
            ds,
            flow,
            sink,
            logs: None,
            _spec: PhantomData,
        }
    }

    /// Attaches a log collector whose text is sent as the payload's `data`.
    #[must_use]
    pub fn with_log_collector(mut self, logs: Arc<dyn LogCollector>) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Runs the list-then-watch loop until cancellation.
    pub async fn run(self, mut cancel: CancelSignal, errors: ErrorSink) {
        let mut checkpoint = String::from("0");

        'watch: loop {
            match self
                .ds
                .list(&self.flow.intent_namespace, self.kind, &ListQuery::default())
                .await
            {
                Ok(list) => {
                    for item in &list.items {
                        if let Err(err) = self.notify(item).await {
                            tracing::warn!(
                                notifier = self.label,
                                name = %item.metadata.name,
                                error = %err,
                                "callback delivery failed"
                            );
                        }
                    }
                    checkpoint = list.resource_version;
                }
                Err(err) => {
                    if self.report_or_retry(&err, &errors, &mut cancel).await {
                        return;
                    }
                    continue 'watch;
                }
            }

            let mut stream = match self
                .ds
                .watch(
                    &self.flow.intent_namespace,
                    self.kind,
                    &checkpoint,
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

            tracing::info!(notifier = self.label, "watching intent channel");

            loop {
                tokio::select! {
                    _ = cancel.changed() => {
                        tracing::info!(notifier = self.label, "notifier stopping");
                        return;
                    }
                    event = stream.recv() => match event {
                        Some(event) => {
                            if event.kind == EventKind::Deleted {
                                continue;
                            }
                            if let Err(err) = self.notify(&event.object).await {
                                tracing::warn!(
                                    notifier = self.label,
                                    name = %event.object.metadata.name,
                                    error = %err,
                                    "callback delivery failed"
                                );
                            }
                            if let Some(version) = &event.object.metadata.resource_version {
                                checkpoint = version.clone();
                            }
                        }
                        None => {
                            tracing::warn!(notifier = self.label, "intent channel closed");
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

    async fn report_or_retry(
        &self,
        err: &FlowError,
        errors: &ErrorSink,
        cancel: &mut CancelSignal,
    ) -> bool {
        if matches!(err, FlowError::Cluster(forge_core::Error::InvalidInput(_))) {
            tracing::error!(notifier = self.label, error = %err, "unrecoverable watch error");
            let _ = errors
                .send(FlowError::precondition(format!(
                    "{} notifier stopped: {err}",
                    self.label
                )))
                .await;
            return true;
        }
        tracing::warn!(notifier = self.label, error = %err, "watch failed; retrying");
        wait_or_cancelled(cancel, RECONNECT_DELAY).await
    }

    /// Posts the payload for a terminal intent; not-yet-done intents are
    /// skipped silently.
    async fn notify(&self, envelope: &Envelope) -> forge_flow::Result<()> {
        let intent: Intent<S> = Intent::from_envelope(envelope)?;
        let meta = intent.spec.meta();
        let Some(outcome) = meta.outcome() else {
            return Ok(());
        };

        let data = match &self.logs {
            Some(collector) => match collector.collect(&intent.metadata.name).await {
                Ok(log) => Some(log),
                Err(err) => {
                    tracing::warn!(
                        notifier = self.label,
                        name = %intent.metadata.name,
                        error = %err,
                        "log collection failed; sending empty data"
                    );
                    Some(String::new())
                }
            },
            None => None,
        };

        let payload = CallbackPayload {
            flow_id: meta.flow_id.clone().unwrap_or_default(),
            step_name: meta.step_name.clone().unwrap_or_default(),
            ack_state: outcome,
            uuid: meta.uuid.clone().unwrap_or_default(),
            done: meta.done,
            data,
        };

        self.sink.post(&payload).await
    }
}
