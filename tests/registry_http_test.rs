use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use opizontas_registry::config::RegistryConfig;
use opizontas_registry::services::registry::http_impl;
use opizontas_registry::services::registry::{LeaseStore, RegistryService};

fn app() -> Router {
    let service = Arc::new(RegistryService::new(LeaseStore::new(), RegistryConfig::default()));
    http_impl::router(service)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .expect("Failed to build request");

    let response = app.clone().oneshot(request).await.expect("Router failed");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("Response is not JSON")
    };
    (status, value)
}

fn doctor() -> Value {
    json!({
        "service_name": "doctor-service",
        "address": "10.0.0.1",
        "port": 8081,
        "lease_duration": 90
    })
}

#[tokio::test]
async fn test_register_then_query() {
    let app = app();

    let (status, body) = send(&app, Method::POST, "/instances", Some(doctor())).await;
    assert_eq!(status, StatusCode::CREATED);
    let instance_id = body["instance_id"].as_str().expect("instance_id missing").to_string();

    let (status, body) = send(&app, Method::GET, "/instances/doctor-service", None).await;
    assert_eq!(status, StatusCode::OK);
    let instances = body.as_array().expect("array expected");
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0]["instance_id"], instance_id);
    assert_eq!(instances[0]["status"], "UP");
    assert_eq!(instances[0]["port"], 8081);
}

#[tokio::test]
async fn test_register_validation_failures() {
    let app = app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/instances",
        Some(json!({ "service_name": "", "address": "10.0.0.1", "port": 8081 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("service_name"));

    let (status, _) = send(
        &app,
        Method::POST,
        "/instances",
        Some(json!({ "service_name": "doctor-service", "address": "10.0.0.1", "port": 8081, "lease_duration": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 缺少必填字段
    let (status, _) = send(&app, Method::POST, "/instances", Some(json!({ "address": "10.0.0.1" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app, Method::GET, "/instances", None).await;
    assert_eq!(body, json!({}));
}

#[tokio::test]
async fn test_renew_known_and_unknown() {
    let app = app();
    let mut request = doctor();
    request["instance_id"] = json!("doc-1");
    send(&app, Method::POST, "/instances", Some(request)).await;

    let (status, body) = send(&app, Method::PUT, "/instances/doctor-service/doc-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instance_id"], "doc-1");

    let (status, body) = send(&app, Method::PUT, "/instances/doctor-service/doc-2", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (_, body) = send(&app, Method::GET, "/instances/doctor-service", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_deregister_is_idempotent() {
    let app = app();
    let mut request = doctor();
    request["instance_id"] = json!("doc-1");
    send(&app, Method::POST, "/instances", Some(request)).await;

    let (status, body) = send(&app, Method::DELETE, "/instances/doctor-service/doc-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deregistered"], true);

    let (status, body) = send(&app, Method::DELETE, "/instances/doctor-service/doc-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deregistered"], false);

    let (_, body) = send(&app, Method::GET, "/instances/doctor-service", None).await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_status_update_and_full_snapshot() {
    let app = app();
    let mut request = doctor();
    request["instance_id"] = json!("doc-1");
    send(&app, Method::POST, "/instances", Some(request)).await;
    send(
        &app,
        Method::POST,
        "/instances",
        Some(json!({ "service_name": "patient-service", "address": "10.0.0.2", "port": 8083, "instance_id": "pat-1" })),
    )
    .await;

    let (status, body) = send(
        &app,
        Method::PUT,
        "/instances/doctor-service/doc-1/status",
        Some(json!({ "status": "DOWN" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "DOWN");

    // DOWN 实例不出现在按服务查询中，但保留在完整快照里
    let (_, body) = send(&app, Method::GET, "/instances/doctor-service", None).await;
    assert_eq!(body, json!([]));

    let (status, body) = send(&app, Method::GET, "/instances", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["doctor-service"][0]["status"], "DOWN");
    assert_eq!(body["patient-service"][0]["instance_id"], "pat-1");
    assert_eq!(body["patient-service"][0]["lease_duration_secs"], 90);

    let (status, _) = send(
        &app,
        Method::PUT,
        "/instances/doctor-service/missing/status",
        Some(json!({ "status": "UP" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::PUT,
        "/instances/doctor-service/doc-1/status",
        Some(json!({ "status": "SLEEPING" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_reports_counts() {
    let app = app();
    send(&app, Method::POST, "/instances", Some(doctor())).await;

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instances"], 1);
    assert_eq!(body["services"], 1);
}
