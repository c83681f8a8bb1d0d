//! CI intent creation.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use forge_core::catalog::CI;
use forge_core::object::Envelope;
use forge_flow::intent::{AckState, CiSpec, Intent, RequestMeta};
use forge_flow::naming::{extract_project, run_name};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Inbound CI creation request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateCiRequest {
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
    /// Branch to build.
    pub branch: String,
    /// Commit to build.
    pub commit_id: String,
    /// Language type hint.
    #[serde(rename = "type")]
    pub code_type: String,
    /// Requested retry budget.
    pub retry_count: u32,
    /// Destination image repository.
    pub output: String,
}

/// `POST /` handler for the CI controller.
pub async fn create(
    State(state): State<Arc<AppState>>,
    body: String,
) -> ApiResult<Json<Envelope>> {
    let request: CreateCiRequest =
        serde_json::from_str(&body).map_err(ApiError::bad_request)?;

    let project = extract_project(&request.git_url).map_err(ApiError::bad_request)?;
    let name = run_name(&[&project, &request.branch], None);

    if let Err(err) = super::force_fail_previous::<CiSpec>(&state, CI, &name).await {
        tracing::warn!(name, error = %err, "prior-intent check failed");
    }

    let intent = Intent::new(
        "CI",
        &name,
        &state.flow().intent_namespace,
        CiSpec {
            git_url: Some(request.git_url),
            branch: Some(request.branch),
            commit_id: Some(request.commit_id),
            code_type: request.code_type,
            retry_count: Some(request.retry_count),
            output: Some(request.output),
            meta: RequestMeta {
                done: false,
                ack_states: request.ack_states,
                flow_id: Some(request.flow_id),
                step_name: Some(request.step_name),
                uuid: Some(request.uuid),
            },
            ..CiSpec::default()
        },
    );

    let envelope = intent.to_envelope().map_err(ApiError::bad_request)?;
    let (stored, _) = state
        .ds()
        .apply(&state.flow().intent_namespace, CI, &name, &envelope, true)
        .await
        .map_err(ApiError::apply_failed)?;

    Ok(Json(stored))
}
