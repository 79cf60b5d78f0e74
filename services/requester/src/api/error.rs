use axum::{
    extract::rejection::JsonRejection,
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::appliance::ApplianceError;
use crate::image::ImageError;
use crate::offers::OfferError;
use crate::upstream::UpstreamResponse;

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://requester.dev/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            code,
        }
    }
}

#[derive(Debug)]
enum ErrorBody {
    Problem(Box<ProblemDetails>),
    /// Upstream body passed through untouched.
    Raw(String),
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn problem(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody::Problem(Box::new(ProblemDetails::new(status, code, message))),
        }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::problem(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::problem(StatusCode::NOT_FOUND, code, message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::problem(StatusCode::CONFLICT, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::problem(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn bad_gateway(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::problem(StatusCode::BAD_GATEWAY, code, message)
    }

    /// Relay an upstream answer with its original status and body.
    pub fn upstream(response: UpstreamResponse) -> Self {
        Self {
            status: response.status,
            body: ErrorBody::Raw(response.body),
        }
    }

    /// Machine-readable error code, if this is a problem response.
    pub fn code(&self) -> Option<&str> {
        match &self.body {
            ErrorBody::Problem(problem) => Some(&problem.code),
            ErrorBody::Raw(_) => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.body {
            ErrorBody::Problem(problem) => {
                let mut response = (self.status, Json(problem)).into_response();
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/problem+json"),
                );
                response
            }
            ErrorBody::Raw(body) => {
                let content_type = if serde_json::from_str::<serde_json::Value>(&body).is_ok() {
                    "application/json"
                } else {
                    "text/plain; charset=utf-8"
                };
                let mut response = (self.status, body).into_response();
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                response
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request("malformed_input", rejection.body_text())
    }
}

impl From<ApplianceError> for ApiError {
    fn from(err: ApplianceError) -> Self {
        let message = err.to_string();
        match err {
            ApplianceError::NotFound(_) => Self::not_found("appliance_not_found", message),
            ApplianceError::ImageNotFound(_) => Self::not_found("image_not_found", message),
            ApplianceError::Conflict(_) => Self::conflict("appliance_exists", message),
            ApplianceError::AlreadyPlaced(_) => Self::conflict("appliance_already_placed", message),
            ApplianceError::Malformed(_) => Self::bad_request("malformed_input", message),
            ApplianceError::Upstream(response) => Self::upstream(response),
            ApplianceError::Unavailable(_) => Self::bad_gateway("upstream_unavailable", message),
            ApplianceError::Cluster(e) => {
                tracing::error!(error = %e, "Cluster adapter error");
                Self::internal("cluster_error", message)
            }
            ApplianceError::Store(e) => {
                tracing::error!(error = %e, "Store error");
                Self::internal("internal_error", "Failed to access appliance registry")
            }
        }
    }
}

impl From<ImageError> for ApiError {
    fn from(err: ImageError) -> Self {
        let message = err.to_string();
        match err {
            ImageError::NotFound(_) => Self::not_found("image_not_found", message),
            ImageError::Conflict(_) => Self::conflict("image_exists", message),
            ImageError::Malformed(_) => Self::bad_request("malformed_input", message),
            ImageError::Store(e) => {
                tracing::error!(error = %e, "Store error");
                Self::internal("internal_error", "Failed to access image registry")
            }
        }
    }
}

impl From<OfferError> for ApiError {
    fn from(err: OfferError) -> Self {
        Self::bad_request("malformed_input", err.to_string())
    }
}
