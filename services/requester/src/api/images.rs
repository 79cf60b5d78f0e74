//! Image API endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use super::appliances::MessageResponse;
use crate::api::error::ApiError;
use crate::image::ImageRecord;
use crate::state::AppState;

/// Create image routes, nested under /image.
///
/// Image ids may contain slashes (`library/nginx`), so the id is a wildcard.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_image).get(list_images))
        .route("/{*id}", get(get_image).delete(delete_image))
}

async fn create_image(
    State(state): State<AppState>,
    payload: Result<Json<ImageRecord>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(image) = payload?;
    let image = state.images().add(image).await?;
    Ok((StatusCode::CREATED, Json(image)).into_response())
}

async fn list_images(State(state): State<AppState>) -> Result<Json<Vec<ImageRecord>>, ApiError> {
    Ok(Json(state.images().list().await?))
}

async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ImageRecord>, ApiError> {
    Ok(Json(state.images().get(&id).await?))
}

async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.images().delete(&id).await?;
    Ok(Json(MessageResponse {
        message: format!("Image '{id}' has been deleted"),
    }))
}
