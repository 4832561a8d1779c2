use axum::extract::State;
use ripam_core::{Address, AddressFilter, ServiceId, SubnetId};
use serde::Deserialize;
use std::net::Ipv4Addr;

use crate::{
    blocking,
    error::ApiError,
    extract::{Json, Query},
    AppState,
};

pub async fn list_addresses(
    State(state): State<AppState>,
    Query(filter): Query<AddressFilter>,
) -> Result<Json<Vec<Address>>, ApiError> {
    Ok(Json(
        blocking(move || state.ledger.list_addresses(&filter)).await?,
    ))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    service_id: ServiceId,
    #[serde(default)]
    subnet_id: Option<SubnetId>,
    #[serde(default)]
    ip_address: Option<Ipv4Addr>,
}

pub async fn assign(
    State(state): State<AppState>,
    Json(request): Json<AssignRequest>,
) -> Result<Json<Address>, ApiError> {
    let address = blocking(move || {
        state
            .ledger
            .assign(request.service_id, request.subnet_id, request.ip_address)
    })
    .await?;
    Ok(Json(address))
}

#[derive(Deserialize)]
pub struct ReleaseRequest {
    #[serde(default)]
    service_id: Option<ServiceId>,
    #[serde(default)]
    ip_address: Option<Ipv4Addr>,
}

/// Answers `null` when the service already holds no address
pub async fn release(
    State(state): State<AppState>,
    Json(request): Json<ReleaseRequest>,
) -> Result<Json<Option<Address>>, ApiError> {
    let address = match (request.service_id, request.ip_address) {
        (Some(service), None) => blocking(move || state.ledger.release_by_service(service)).await?,
        (None, Some(ip)) => Some(blocking(move || state.ledger.release_address(ip)).await?),
        _ => {
            return Err(ApiError::InvalidRequest(
                "provide exactly one of service_id or ip_address".into(),
            ))
        }
    };
    Ok(Json(address))
}

#[derive(Deserialize)]
pub struct AddressRequest {
    ip_address: Ipv4Addr,
    #[serde(default)]
    notes: Option<String>,
}

pub async fn reserve(
    State(state): State<AppState>,
    Json(request): Json<AddressRequest>,
) -> Result<Json<Address>, ApiError> {
    let address =
        blocking(move || state.ledger.reserve(request.ip_address, request.notes)).await?;
    Ok(Json(address))
}

pub async fn unreserve(
    State(state): State<AppState>,
    Json(request): Json<AddressRequest>,
) -> Result<Json<Address>, ApiError> {
    Ok(Json(
        blocking(move || state.ledger.unreserve(request.ip_address)).await?,
    ))
}

pub async fn mark_synced(
    State(state): State<AppState>,
    Json(request): Json<AddressRequest>,
) -> Result<Json<Address>, ApiError> {
    Ok(Json(
        blocking(move || state.ledger.mark_synced(request.ip_address)).await?,
    ))
}
