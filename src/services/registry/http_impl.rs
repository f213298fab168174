use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use http::StatusCode;
use serde_json::json;

use super::error::RegistryError;
use super::service::RegistryService;
use super::types::{InstanceInfo, RegisterRequest, RegisterResponse, StatusUpdate};

// 显式注册 HTTP 路由
pub fn router(service: Arc<RegistryService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/instances", post(register).get(query_all))
        .route("/instances/{service_name}", get(query))
        .route(
            "/instances/{service_name}/{instance_id}",
            put(renew).delete(deregister),
        )
        .route(
            "/instances/{service_name}/{instance_id}/status",
            put(update_status),
        )
        .with_state(service)
}

async fn health(State(service): State<Arc<RegistryService>>) -> impl IntoResponse {
    let store = service.store();
    Json(json!({
        "status": "ok",
        "instances": store.instance_count(),
        "services": store.service_names().len(),
    }))
}

async fn register(
    State(service): State<Arc<RegistryService>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), RegistryError> {
    // 请求体格式错误同样按校验失败返回 400
    let Json(request) = payload.map_err(|e| RegistryError::Validation(e.body_text()))?;
    let instance_id = service.register(request)?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { instance_id })))
}

async fn renew(
    State(service): State<Arc<RegistryService>>,
    Path((service_name, instance_id)): Path<(String, String)>,
) -> Result<Json<InstanceInfo>, RegistryError> {
    service.renew(&service_name, &instance_id).map(Json)
}

async fn deregister(
    State(service): State<Arc<RegistryService>>,
    Path((service_name, instance_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let existed = service.deregister(&service_name, &instance_id);
    (StatusCode::OK, Json(json!({ "deregistered": existed })))
}

async fn update_status(
    State(service): State<Arc<RegistryService>>,
    Path((service_name, instance_id)): Path<(String, String)>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<InstanceInfo>, RegistryError> {
    let Json(update) = payload.map_err(|e| RegistryError::Validation(e.body_text()))?;
    service
        .update_status(&service_name, &instance_id, update.status)
        .map(Json)
}

async fn query(
    State(service): State<Arc<RegistryService>>,
    Path(service_name): Path<String>,
) -> impl IntoResponse {
    Json(service.query(&service_name))
}

async fn query_all(State(service): State<Arc<RegistryService>>) -> impl IntoResponse {
    Json(service.query_all())
}
