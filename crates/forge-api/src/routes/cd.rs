//! CD intent creation.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use forge_core::catalog::CD;
use forge_core::object::Envelope;
use forge_flow::intent::{AckState, ArtifactInfo, CdSpec, Intent, RequestMeta};
use forge_flow::naming::{extract_service, run_name};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Inbound CD creation request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateCdRequest {
    /// Caller's flow identifier.
    pub flow_id: String,
    /// Caller's step name.
    pub step_name: String,
    /// Pre-seeded ack states, usually empty.
    pub ack_states: Vec<AckState>,
    /// Caller's request identifier.
    pub uuid: String,
    /// Requested retry budget.
    pub retry_count: u32,
    /// Digest-pinned image reference naming the service.
    pub service_name: String,
    /// Image to deploy.
    pub service_image: String,
    /// Target namespace.
    pub deploy_namespace: String,
    /// Deployment topology.
    pub artifact_info: ArtifactInfo,
    /// Deployment flavor.
    #[serde(alias = "DeployType")]
    pub deploy_type: String,
    /// CPU limit.
    pub cpu_limit: String,
    /// Memory limit.
    pub mem_limit: String,
    /// CPU requests.
    pub cpu_requests: String,
    /// Memory requests.
    pub mem_requests: String,
    /// Replica count.
    pub replicas: u32,
}

/// `POST /` handler for the CD controller.
pub async fn create(
    State(state): State<Arc<AppState>>,
    body: String,
) -> ApiResult<Json<Envelope>> {
    let request: CreateCdRequest =
        serde_json::from_str(&body).map_err(ApiError::bad_request)?;

    let service = extract_service(&request.service_name).map_err(ApiError::bad_request)?;
    let name = run_name(&[&service, &request.deploy_type], None);

    if let Err(err) = super::force_fail_previous::<CdSpec>(&state, CD, &name).await {
        tracing::warn!(name, error = %err, "prior-intent check failed");
    }

    let intent = Intent::new(
        "CD",
        &name,
        &state.flow().intent_namespace,
        CdSpec {
            service_name: Some(service),
            service_image: Some(request.service_image),
            deploy_namespace: Some(request.deploy_namespace),
            artifact_info: Some(request.artifact_info),
            deploy_type: Some(request.deploy_type),
            cpu_limit: Some(request.cpu_limit),
            mem_limit: Some(request.mem_limit),
            cpu_requests: Some(request.cpu_requests),
            mem_requests: Some(request.mem_requests),
            replicas: request.replicas,
            meta: RequestMeta {
                done: false,
                ack_states: request.ack_states,
                flow_id: Some(request.flow_id),
                step_name: Some(request.step_name),
                uuid: Some(request.uuid),
            },
            ..CdSpec::default()
        },
    );

    let envelope = intent.to_envelope().map_err(ApiError::bad_request)?;
    let (stored, _) = state
        .ds()
        .apply(&state.flow().intent_namespace, CD, &name, &envelope, true)
        .await
        .map_err(ApiError::apply_failed)?;

    Ok(Json(stored))
}
