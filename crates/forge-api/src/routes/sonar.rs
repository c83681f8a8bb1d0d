//! Sonar-scan intent creation.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use forge_core::catalog::SONAR;
use forge_core::object::Envelope;
use forge_flow::intent::{AckState, Intent, RequestMeta, SonarSpec};
use forge_flow::naming::{extract_project, run_name};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Inbound sonar-scan creation request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateSonarRequest {
    /// Caller's flow identifier.
    pub flow_id: String,
    /// Caller's step name.
    pub step_name: String,
    /// Pre-seeded ack states, usually empty.
    pub ack_states: Vec<AckState>,
    /// Caller's request identifier.
    pub uuid: String,
    /// Source repository URL.
    pub git_url: String,
    /// Branch to scan.
    pub branch: String,
    /// Project language.
    pub language: String,
    /// Service name scoping the scan.
    pub service_name: String,
}

/// `POST /` handler for the sonar controller.
pub async fn create(
    State(state): State<Arc<AppState>>,
    body: String,
) -> ApiResult<Json<Envelope>> {
    let request: CreateSonarRequest =
        serde_json::from_str(&body).map_err(ApiError::bad_request)?;

    let project = extract_project(&request.git_url).map_err(ApiError::bad_request)?;
    let name = if request.service_name.is_empty() {
        run_name(&[&project, &request.branch], Some("sonar"))
    } else {
        run_name(
            &[&request.service_name, &project, &request.branch],
            Some("sonar"),
        )
    };

    if let Err(err) = super::force_fail_previous::<SonarSpec>(&state, SONAR, &name).await {
        tracing::warn!(name, error = %err, "prior-intent check failed");
    }

    let intent = Intent::new(
        "Sonar",
        &name,
        &state.flow().intent_namespace,
        SonarSpec {
            git_url: Some(request.git_url),
            branch: Some(request.branch),
            language: Some(request.language),
            service_name: request.service_name,
            meta: RequestMeta {
                done: false,
                ack_states: request.ack_states,
                flow_id: Some(request.flow_id),
                step_name: Some(request.step_name),
                uuid: Some(request.uuid),
            },
        },
    );

    let envelope = intent.to_envelope().map_err(ApiError::bad_request)?;
    let (stored, _) = state
        .ds()
        .apply(&state.flow().intent_namespace, SONAR, &name, &envelope, true)
        .await
        .map_err(ApiError::apply_failed)?;

    Ok(Json(stored))
}
