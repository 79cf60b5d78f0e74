//! Offer callback gateway.
//!
//! The coordinator posts the offers it found for an appliance here. The body
//! is normalised into an ordered offer set and handed to the lifecycle
//! manager, which places the appliance.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use crate::api::error::ApiError;
use crate::offers::OfferSet;
use crate::state::AppState;

/// Receive offers for an appliance.
///
/// POST /appliance/{id}/offer
pub async fn receive_offers(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    let offers = OfferSet::from_json(body)?;
    info!(appliance_id = %id, offers = offers.len(), "Received offers");

    let view = state.appliances().accept_offer(&id, &offers).await?;
    Ok((StatusCode::CREATED, Json(view)).into_response())
}
