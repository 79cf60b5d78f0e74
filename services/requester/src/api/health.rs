//! Liveness and readiness checks.
//!
//! `/livez` and `/healthz` only prove the process answers. `/readyz` checks
//! both registries and reports where offers are requested from; it answers
//! 503 while either registry is unreachable.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

const SERVICE: &str = "requester";

/// Create health check routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/livez", get(livez))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct Readiness {
    status: &'static str,
    service: &'static str,
    registries: Registries,
    coordinator: String,
}

#[derive(Debug, Serialize)]
struct Registries {
    appliances: RegistryCheck,
    images: RegistryCheck,
}

#[derive(Debug, Serialize)]
struct RegistryCheck {
    reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<E: std::fmt::Display> From<Result<(), E>> for RegistryCheck {
    fn from(result: Result<(), E>) -> Self {
        Self {
            reachable: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        }
    }
}

async fn livez() -> StatusCode {
    StatusCode::OK
}

async fn healthz() -> Json<Health> {
    Json(Health {
        status: "ok",
        service: SERVICE,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let (appliances, images) = tokio::join!(
        state.appliances().health_check(),
        state.images().health_check()
    );
    let registries = Registries {
        appliances: appliances.into(),
        images: images.into(),
    };

    let ready = registries.appliances.reachable && registries.images.reachable;
    let status = if ready {
        StatusCode::OK
    } else {
        tracing::warn!(?registries, "Not ready: registry unreachable");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(Readiness {
            status: if ready { "ok" } else { "degraded" },
            service: SERVICE,
            registries,
            coordinator: state.appliances().coordinator_url().to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn test_registry_check_carries_error() {
        let ok: RegistryCheck = Ok::<(), StoreError>(()).into();
        assert!(ok.reachable);
        assert!(ok.error.is_none());

        let failed: RegistryCheck =
            Err::<(), _>(StoreError::Query(sqlx::Error::PoolTimedOut)).into();
        assert!(!failed.reachable);
        assert!(failed.error.unwrap().contains("query failed"));
    }
}
