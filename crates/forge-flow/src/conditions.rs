//! Pipeline-run status condition extraction and classification.

use serde::{Deserialize, Serialize};

use forge_core::object::Envelope;

/// One status condition of an execution resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Condition {
    /// When the condition last changed.
    pub last_transition_time: String,
    /// Human-readable message.
    pub message: String,
    /// Machine-readable reason.
    pub reason: String,
    /// Condition status (`True`/`False`/`Unknown`).
    pub status: String,
    /// Condition type.
    #[serde(rename = "type")]
    pub kind: String,
}

/// Terminal classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run completed successfully.
    Succeeded,
    /// The run failed.
    Failed,
    /// The run has not reached a terminal condition.
    Pending,
}

/// Reads the first status condition off an execution resource.
///
/// Returns `None` when the resource has no conditions yet (not started).
#[must_use]
pub fn first_condition(object: &Envelope) -> Option<Condition> {
    let conditions = object.sections.get("status")?.get("conditions")?.as_array()?;
    let first = conditions.first()?;
    serde_json::from_value(first.clone()).ok()
}

/// Classifies a run by its first condition.
///
/// `Succeeded/True/Succeeded` is success, `Failed/False/Succeeded` is
/// failure; anything else (including no conditions) is still pending.
#[must_use]
pub fn classify(object: &Envelope) -> RunOutcome {
    let Some(condition) = first_condition(object) else {
        return RunOutcome::Pending;
    };

    match (
        condition.reason.as_str(),
        condition.status.as_str(),
        condition.kind.as_str(),
    ) {
        ("Succeeded", "True", "Succeeded") => RunOutcome::Succeeded,
        ("Failed", "False", "Succeeded") => RunOutcome::Failed,
        _ => RunOutcome::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run_with_condition(reason: &str, status: &str, kind: &str) -> Envelope {
        Envelope::new("pipeline.forge.dev/v1alpha1", "PipelineRun", "app-main", "forge-ops")
            .with_section(
                "status",
                json!({
                    "conditions": [{
                        "lastTransitionTime": "2021-03-01T00:00:00Z",
                        "message": "",
                        "reason": reason,
                        "status": status,
                        "type": kind,
                    }]
                }),
            )
    }

    #[test]
    fn success_condition_classifies_succeeded() {
        let run = run_with_condition("Succeeded", "True", "Succeeded");
        assert_eq!(classify(&run), RunOutcome::Succeeded);
    }

    #[test]
    fn failure_condition_classifies_failed() {
        let run = run_with_condition("Failed", "False", "Succeeded");
        assert_eq!(classify(&run), RunOutcome::Failed);
    }

    #[test]
    fn running_condition_stays_pending() {
        let run = run_with_condition("Running", "Unknown", "Succeeded");
        assert_eq!(classify(&run), RunOutcome::Pending);
    }

    #[test]
    fn missing_conditions_stay_pending() {
        let run = Envelope::new(
            "pipeline.forge.dev/v1alpha1",
            "PipelineRun",
            "app-main",
            "forge-ops",
        );
        assert_eq!(classify(&run), RunOutcome::Pending);
        assert_eq!(first_condition(&run), None);
    }
}
