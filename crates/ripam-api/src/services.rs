use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
};
use ripam_core::{CustomerService, ServiceId, SyncStatus};
use ripam_ledger::{ProvisionRequest, Provisioned, ServiceDetail};
use serde::Deserialize;

use crate::{
    blocking,
    error::ApiError,
    extract::{Json, Path},
    AppState,
};

pub async fn provision(
    State(state): State<AppState>,
    Json(request): Json<ProvisionRequest>,
) -> Result<(StatusCode, Json<Provisioned>), ApiError> {
    let provisioned = blocking(move || state.coordinator.provision(request)).await?;
    Ok((StatusCode::CREATED, Json(provisioned)))
}

pub async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
) -> Result<Json<ServiceDetail>, ApiError> {
    Ok(Json(blocking(move || state.coordinator.service(id)).await?))
}

pub async fn activate(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
) -> Result<Json<CustomerService>, ApiError> {
    Ok(Json(blocking(move || state.coordinator.activate(id)).await?))
}

#[derive(Default, Deserialize)]
pub struct SuspendRequest {
    #[serde(default)]
    release_ip: bool,
}

/// The body is optional; an empty one keeps the address bound.
pub async fn suspend(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
    body: Bytes,
) -> Result<Json<CustomerService>, ApiError> {
    let request: SuspendRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SuspendRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| ApiError::InvalidRequest(format!("Invalid suspend body: {err}")))?
    };
    Ok(Json(
        blocking(move || state.coordinator.suspend(id, request.release_ip)).await?,
    ))
}

pub async fn terminate(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
) -> Result<Json<CustomerService>, ApiError> {
    Ok(Json(blocking(move || state.coordinator.terminate(id)).await?))
}

pub async fn reactivate(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
) -> Result<Json<CustomerService>, ApiError> {
    Ok(Json(blocking(move || state.coordinator.reactivate(id)).await?))
}

#[derive(Deserialize)]
pub struct SyncOutcome {
    status: SyncStatus,
}

pub async fn record_sync(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
    Json(outcome): Json<SyncOutcome>,
) -> Result<Json<ServiceDetail>, ApiError> {
    Ok(Json(
        blocking(move || state.coordinator.record_sync(id, outcome.status)).await?,
    ))
}
