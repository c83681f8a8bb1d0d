//! Per-kind intent reconcilers.
//!
//! Each reconciler is a long-lived supervised task running one dispatch
//! loop over two watch streams: the intent kind it owns and the execution
//! kind it drives. Events are processed one at a time; a sub-step failure
//! aborts only that event's reconciliation (logged, event dropped) while
//! the loop continues. A closed stream is a transient disconnect: the watch
//! is re-established from the last recorded resource version after a short
//! delay, indefinitely. Only a truly unrecoverable watch error (an unknown
//! kind) reaches the supervisor's error sink and stops the reconciler.

mod cd;
mod pipeline;

pub use cd::CdReconciler;
pub use pipeline::{PipelineReconciler, ci_reconciler, sonar_reconciler, unit_reconciler};

use std::time::Duration;

use crate::datasource::DataSource;
use crate::error::Result;
use crate::intent::{AckState, Intent, IntentSpec};

/// Delay before re-establishing a closed watch stream.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Patches an intent record's completion fields.
///
/// The apply is an update, never a create: a deleted intent must not be
/// resurrected by a late execution event.
pub(crate) async fn complete_intent<S: IntentSpec>(
    ds: &DataSource,
    namespace: &str,
    kind: &str,
    name: &str,
    outcome: AckState,
) -> Result<()> {
    let envelope = ds.get(namespace, kind, name, &[]).await?;
    let mut intent: Intent<S> = Intent::from_envelope(&envelope)?;

    intent.spec.meta_mut().complete(outcome);

    ds.apply(namespace, kind, name, &intent.to_envelope()?, false)
        .await?;
    Ok(())
}

/// Whether a watch error can be healed by reconnecting.
///
/// Unknown kinds never heal; everything else is treated as transient.
pub(crate) fn is_unrecoverable(err: &crate::error::Error) -> bool {
    matches!(
        err,
        crate::error::Error::Cluster(forge_core::Error::InvalidInput(_))
    )
}
