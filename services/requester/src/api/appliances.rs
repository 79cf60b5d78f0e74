//! Appliance API endpoints.
//!
//! Submission, listing, live status, deletion, and the offer callback the
//! coordinator posts to.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use super::offers;
use crate::api::error::ApiError;
use crate::appliance::{ApplianceView, SubmitAppliance};
use crate::state::AppState;

/// Create appliance routes, nested under /appliance.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_appliance).get(list_appliances))
        .route("/{id}", get(get_appliance).delete(delete_appliance))
        .route("/{id}/offer", post(offers::receive_offers))
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Submit an appliance.
///
/// POST /appliance
async fn create_appliance(
    State(state): State<AppState>,
    payload: Result<Json<SubmitAppliance>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let view = state.appliances().create(req).await?;
    Ok((StatusCode::CREATED, Json(view)).into_response())
}

/// List stored appliances.
///
/// GET /appliance
async fn list_appliances(State(state): State<AppState>) -> Result<Json<Vec<ApplianceView>>, ApiError> {
    let records = state.appliances().list().await?;
    Ok(Json(records.into_iter().map(ApplianceView::from).collect()))
}

/// Get an appliance with its live status.
///
/// GET /appliance/{id}
async fn get_appliance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApplianceView>, ApiError> {
    Ok(Json(state.appliances().get(&id).await?))
}

/// Delete an appliance.
///
/// DELETE /appliance/{id}
async fn delete_appliance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.appliances().delete(&id).await?;
    Ok(Json(MessageResponse {
        message: format!("Appliance '{id}' has been deleted"),
    }))
}
