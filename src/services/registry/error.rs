use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::json;

/// 注册中心错误类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid registration: {0}")]
    Validation(String),
    #[error("Instance not found: {service_name}/{instance_id}")]
    NotFound {
        service_name: String,
        instance_id: String,
    },
    /// 内部信号：本轮清理因续约率过低而暂停
    #[error(
        "Eviction suspended by self-preservation: {renewals} renewals received, {expected} expected, {expired} leases expired"
    )]
    SelfPreservationSuspended {
        renewals: u64,
        expected: u64,
        expired: usize,
    },
}

impl RegistryError {
    pub fn not_found(service_name: &str, instance_id: &str) -> Self {
        RegistryError::NotFound {
            service_name: service_name.to_string(),
            instance_id: instance_id.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
            RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
            RegistryError::SelfPreservationSuspended { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
