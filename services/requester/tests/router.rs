//! Router-level tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use requester::{
    api,
    appliance::{ApplianceManager, ApplianceRecord},
    cluster::ClusterRegistry,
    coordinator::CoordinatorClient,
    image::{ImageRecord, ImageRegistry},
    state::AppState,
    store::MemoryStore,
};
use rstest::rstest;
use serde_json::Value;
use tower::ServiceExt;

fn router() -> Router {
    let http = reqwest::Client::new();
    let images = ImageRegistry::new(Arc::new(MemoryStore::<ImageRecord>::new()));
    let manager = Arc::new(ApplianceManager::new(
        Arc::new(MemoryStore::<ApplianceRecord>::new()),
        images.clone(),
        CoordinatorClient::new(http.clone(), "http://127.0.0.1:1/requests", "requester"),
        ClusterRegistry::new(http),
        "http://127.0.0.1:9090",
    ));
    api::create_router(AppState::new(manager, images))
}

async fn send(request: Request<Body>) -> (StatusCode, Option<String>, Value) {
    let response = router().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, content_type, body)
}

fn json_request(method: Method, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[rstest]
#[case("/healthz")]
#[case("/readyz")]
#[tokio::test]
async fn test_health_endpoints(#[case] uri: &str) {
    let request = Request::get(uri).body(Body::empty()).unwrap();
    let (status, _, body) = send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "requester");
}

#[tokio::test]
async fn test_readiness_reports_store() {
    let request = Request::get("/readyz").body(Body::empty()).unwrap();
    let (_, _, body) = send(request).await;
    assert_eq!(body["registries"]["appliances"]["reachable"], true);
    assert_eq!(body["registries"]["images"]["reachable"], true);
    assert_eq!(body["coordinator"], "http://127.0.0.1:1/requests");
}

#[tokio::test]
async fn test_livez_has_no_body() {
    let request = Request::get("/livez").body(Body::empty()).unwrap();
    let (status, _, body) = send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn test_empty_registries_list_empty() {
    for uri in ["/appliance", "/image"] {
        let (status, _, body) = send(Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }
}

#[rstest]
#[case(Method::GET, "/appliance/ghost", "appliance_not_found")]
#[case(Method::DELETE, "/appliance/ghost", "appliance_not_found")]
#[case(Method::GET, "/image/library/ghost", "image_not_found")]
#[tokio::test]
async fn test_missing_resources_are_problems(
    #[case] method: Method,
    #[case] uri: &str,
    #[case] code: &str,
) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let (status, content_type, body) = send(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(content_type.as_deref(), Some("application/problem+json"));
    assert_eq!(body["code"], code);
    assert_eq!(body["status"], 404);
}

#[rstest]
#[case("/appliance", "{")]
#[case("/appliance/web-1/offer", "[1, 2]")]
#[case("/appliance/web-1/offer", "{}")]
#[case("/image", r#"{"id": "x", "ports": [{"containerPort": 0}]}"#)]
#[tokio::test]
async fn test_malformed_bodies_are_bad_requests(#[case] uri: &str, #[case] body: &str) {
    let (status, _, problem) = send(json_request(Method::POST, uri, body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(problem["code"], "malformed_input");
}
