use axum::{extract::State, http::StatusCode};
use ripam_cidr::Cidr;
use ripam_core::{
    NewSubnet, OverlapConflict, RipamError, RouterId, Subnet, SubnetId, SubnetUpdate,
    Utilization,
};
use ripam_ledger::GenerationReport;
use serde::{Deserialize, Serialize};

use crate::{
    blocking,
    error::ApiError,
    extract::{Json, Path, Query},
    AppState,
};

#[derive(Deserialize)]
pub struct SubnetQuery {
    router_id: Option<RouterId>,
}

pub async fn list_subnets(
    State(state): State<AppState>,
    Query(query): Query<SubnetQuery>,
) -> Result<Json<Vec<Subnet>>, ApiError> {
    Ok(Json(
        blocking(move || state.ledger.list_subnets(query.router_id)).await?,
    ))
}

pub async fn create_subnet(
    State(state): State<AppState>,
    Json(new): Json<NewSubnet>,
) -> Result<(StatusCode, Json<Subnet>), ApiError> {
    let subnet = blocking(move || state.ledger.create_subnet(new)).await?;
    Ok((StatusCode::CREATED, Json(subnet)))
}

pub async fn get_subnet(
    State(state): State<AppState>,
    Path(id): Path<SubnetId>,
) -> Result<Json<Subnet>, ApiError> {
    Ok(Json(blocking(move || state.ledger.get_subnet(id)).await?))
}

pub async fn update_subnet(
    State(state): State<AppState>,
    Path(id): Path<SubnetId>,
    Json(update): Json<SubnetUpdate>,
) -> Result<Json<Subnet>, ApiError> {
    Ok(Json(
        blocking(move || state.ledger.update_subnet(id, update)).await?,
    ))
}

pub async fn delete_subnet(
    State(state): State<AppState>,
    Path(id): Path<SubnetId>,
) -> Result<Json<Subnet>, ApiError> {
    Ok(Json(blocking(move || state.ledger.delete_subnet(id)).await?))
}

pub async fn utilization(
    State(state): State<AppState>,
    Path(id): Path<SubnetId>,
) -> Result<Json<Utilization>, ApiError> {
    Ok(Json(blocking(move || state.ledger.utilization(id)).await?))
}

#[derive(Deserialize)]
pub struct GenerateQuery {
    #[serde(default)]
    resume: bool,
}

pub async fn generate(
    State(state): State<AppState>,
    Path(id): Path<SubnetId>,
    Query(query): Query<GenerateQuery>,
) -> Result<Json<GenerationReport>, ApiError> {
    let report = blocking(move || {
        if query.resume {
            state.ledger.resume_generation(id)
        } else {
            state.ledger.generate(id)
        }
    })
    .await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlapRequest {
    cidr: String,
    #[serde(default)]
    exclude_id: Option<SubnetId>,
}

#[derive(Serialize)]
pub struct OverlapResponse {
    overlaps: bool,
    subnets: Vec<OverlapConflict>,
}

pub async fn check_overlap(
    State(state): State<AppState>,
    Json(request): Json<OverlapRequest>,
) -> Result<Json<OverlapResponse>, ApiError> {
    let cidr = Cidr::parse(request.cidr.trim()).map_err(RipamError::from)?;
    let subnets = blocking(move || state.ledger.find_overlaps(&cidr, request.exclude_id)).await?;
    Ok(Json(OverlapResponse {
        overlaps: !subnets.is_empty(),
        subnets,
    }))
}
