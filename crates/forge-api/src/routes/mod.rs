//! Intent creation endpoints, one module per intent kind.
//!
//! Each handler translates the inbound JSON into an intent record, derives
//! the run name, force-fails any undone prior intent with the same derived
//! name (so an orphaned in-flight run never blocks a resubmission), applies
//! the record, and returns the stored object as JSON.

pub mod cd;
pub mod ci;
pub mod sonar;
pub mod unit;

use forge_flow::intent::{AckState, Intent, IntentSpec};

use crate::server::AppState;

/// Forces a prior, not-yet-done intent with the same derived name to
/// `Done=true, AckStates=[FAIL]` so the new submission starts cleanly.
///
/// A missing prior intent is the normal case and not an error. Failures
/// here are logged by the caller and do not block the new submission.
pub(crate) async fn force_fail_previous<S: IntentSpec>(
    state: &AppState,
    kind: &str,
    name: &str,
) -> forge_flow::Result<()> {
    let namespace = &state.flow().intent_namespace;
    let envelope = match state.ds().get(namespace, kind, name, &[]).await {
        Ok(envelope) => envelope,
        Err(err) if err.is_not_found() => return Ok(()),
        Err(err) => return Err(err),
    };

    let mut prior: Intent<S> = Intent::from_envelope(&envelope)?;
    if prior.spec.meta().done {
        return Ok(());
    }

    prior.spec.meta_mut().complete(AckState::Fail);
    state
        .ds()
        .apply(namespace, kind, name, &prior.to_envelope()?, false)
        .await?;

    tracing::info!(kind, name, "force-failed undone prior intent");
    Ok(())
}
