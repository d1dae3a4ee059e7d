//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::deploy::orchestrator::ReconcileReport;
use crate::errors::{ErrorKind, OrchestratorError};
use crate::models::deployment::DeploymentView;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error body returned by every failing route
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NoFreePort => StatusCode::CONFLICT,
        ErrorKind::NotFound | ErrorKind::ConfigNotFound | ErrorKind::UnknownOwner => {
            StatusCode::NOT_FOUND
        }
        ErrorKind::InvalidRequest => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::SpawnFailed => StatusCode::BAD_GATEWAY,
        ErrorKind::RegistryIo => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ProcessNotFound | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let body = ErrorResponse {
            kind,
            message: self.user_message(),
        };
        (status_for(kind), Json(body)).into_response()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deployd".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Listing filter
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub owner_id: Option<String>,
}

/// Deployments response
#[derive(Debug, Serialize)]
pub struct DeploymentsResponse {
    pub deployments: Vec<DeploymentView>,
    pub total: usize,
}

/// List deployments, optionally for one owner
pub async fn list_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let records = match &query.owner_id {
        Some(owner_id) => orchestrator.list_for_owner(owner_id).await,
        None => orchestrator.list_all().await,
    };

    let deployments: Vec<DeploymentView> = records.iter().map(|d| orchestrator.view(d)).collect();
    let total = deployments.len();
    Json(DeploymentsResponse { deployments, total })
}

/// Publish request
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub owner_id: String,
    pub config_ref: String,
}

/// Publish handler
pub async fn publish_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<DeploymentView>, OrchestratorError> {
    let deployment = state
        .orchestrator
        .publish(&request.owner_id, &request.config_ref)
        .await?;
    Ok(Json(state.orchestrator.view(&deployment)))
}

/// Reconciled status of one deployment
pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentView>, OrchestratorError> {
    let deployment = state.orchestrator.status(&id).await?;
    Ok(Json(state.orchestrator.view(&deployment)))
}

/// Stop handler
pub async fn stop_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentView>, OrchestratorError> {
    let deployment = state.orchestrator.stop(&id).await?;
    Ok(Json(state.orchestrator.view(&deployment)))
}

/// Restart handler
pub async fn restart_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentView>, OrchestratorError> {
    let deployment = state.orchestrator.restart(&id).await?;
    Ok(Json(state.orchestrator.view(&deployment)))
}

/// Delete handler
pub async fn delete_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentView>, OrchestratorError> {
    let deployment = state.orchestrator.delete(&id).await?;
    Ok(Json(state.orchestrator.view(&deployment)))
}

/// Owner removal response
#[derive(Debug, Serialize)]
pub struct DeleteOwnerResponse {
    pub owner_id: String,
    pub removed: usize,
}

/// Delete every deployment of an owner
pub async fn delete_owner_handler(
    State(state): State<Arc<ServerState>>,
    Path(owner_id): Path<String>,
) -> Result<Json<DeleteOwnerResponse>, OrchestratorError> {
    let removed = state.orchestrator.delete_owner(&owner_id).await?;
    Ok(Json(DeleteOwnerResponse { owner_id, removed }))
}

/// Run a reconciliation sweep now
pub async fn reconcile_handler(State(state): State<Arc<ServerState>>) -> Json<ReconcileReport> {
    Json(state.orchestrator.reconcile_all().await)
}
