use axum::{extract::State, http::StatusCode};
use ripam_cidr::Validation;
use ripam_core::{Router, RouterId, RouterStatus, ServicePlan};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    blocking,
    error::ApiError,
    extract::{Json, Path},
    AppState,
};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
pub struct ValidateRequest {
    cidr: String,
}

pub async fn validate_cidr(Json(request): Json<ValidateRequest>) -> Json<Validation> {
    Json(ripam_cidr::validate(&request.cidr))
}

#[derive(Deserialize)]
pub struct NewRouter {
    name: String,
    #[serde(default)]
    status: RouterStatus,
}

pub async fn create_router(
    State(state): State<AppState>,
    Json(new): Json<NewRouter>,
) -> Result<(StatusCode, Json<Router>), ApiError> {
    let router = blocking(move || state.directory.add_router(&new.name, new.status)).await?;
    Ok((StatusCode::CREATED, Json(router)))
}

pub async fn list_routers(State(state): State<AppState>) -> Result<Json<Vec<Router>>, ApiError> {
    Ok(Json(blocking(move || state.directory.routers()).await?))
}

#[derive(Deserialize)]
pub struct RouterStatusUpdate {
    status: RouterStatus,
}

pub async fn set_router_status(
    State(state): State<AppState>,
    Path(id): Path<RouterId>,
    Json(update): Json<RouterStatusUpdate>,
) -> Result<Json<Router>, ApiError> {
    let router = blocking(move || state.directory.set_router_status(id, update.status)).await?;
    Ok(Json(router))
}

#[derive(Deserialize)]
pub struct NewPlan {
    name: String,
    #[serde(default)]
    download_mbps: Option<u32>,
    #[serde(default)]
    upload_mbps: Option<u32>,
}

pub async fn create_plan(
    State(state): State<AppState>,
    Json(new): Json<NewPlan>,
) -> Result<(StatusCode, Json<ServicePlan>), ApiError> {
    let plan = blocking(move || {
        state
            .directory
            .add_plan(&new.name, new.download_mbps, new.upload_mbps)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn list_plans(State(state): State<AppState>) -> Result<Json<Vec<ServicePlan>>, ApiError> {
    Ok(Json(blocking(move || state.directory.plans()).await?))
}
