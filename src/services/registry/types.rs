use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

// 实例状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Up,
    Starting,
    Down,
    Unknown,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Up => "UP",
            InstanceStatus::Starting => "STARTING",
            InstanceStatus::Down => "DOWN",
            InstanceStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

// 服务实例注册信息，时间戳均为单调时钟
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub service_name: String,
    pub address: String,
    pub port: u16,
    pub status: InstanceStatus,
    pub lease_duration: Duration,
    pub registered_at: Instant,
    pub last_renewal_timestamp: Instant,
    pub metadata: HashMap<String, String>,
}

impl InstanceRecord {
    /// 生成实例ID：地址 + 端口 + 随机后缀
    pub fn generate_id(address: &str, port: u16) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}:{}:{}", address, port, &suffix[..8])
    }

    pub fn renew(&mut self, now: Instant) {
        self.last_renewal_timestamp = now;
        // 首次心跳即视为启动完成
        if self.status == InstanceStatus::Starting {
            self.status = InstanceStatus::Up;
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_renewal_timestamp) > self.lease_duration
    }

    pub fn to_info(&self, now: Instant) -> InstanceInfo {
        InstanceInfo {
            instance_id: self.instance_id.clone(),
            service_name: self.service_name.clone(),
            address: self.address.clone(),
            port: self.port,
            status: self.status,
            lease_duration_secs: self.lease_duration.as_secs(),
            last_renewal_ms_ago: now
                .saturating_duration_since(self.last_renewal_timestamp)
                .as_millis() as u64,
            metadata: self.metadata.clone(),
        }
    }
}

/// 注册请求体（`POST /instances`）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub service_name: String,
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InstanceStatus>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: InstanceStatus,
}

/// 对外返回的实例视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub service_name: String,
    pub address: String,
    pub port: u16,
    pub status: InstanceStatus,
    pub lease_duration_secs: u64,
    pub last_renewal_ms_ago: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

// 单个服务下的实例集合（实例ID -> 实例）
pub type ServiceInstances = DashMap<String, InstanceRecord>;

// 服务注册表（服务名 -> 服务实例集合）
pub type ServiceRegistry = Arc<DashMap<String, ServiceInstances>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_uses_upper_case_wire_form() {
        let json = serde_json::to_string(&InstanceStatus::Starting).unwrap();
        assert_eq!(json, "\"STARTING\"");
        let parsed: InstanceStatus = serde_json::from_str("\"DOWN\"").unwrap();
        assert_eq!(parsed, InstanceStatus::Down);
    }

    #[test]
    fn generated_ids_share_location_but_differ() {
        let a = InstanceRecord::generate_id("10.0.0.1", 8081);
        let b = InstanceRecord::generate_id("10.0.0.1", 8081);
        assert!(a.starts_with("10.0.0.1:8081:"));
        assert_ne!(a, b);
    }

    #[test]
    fn register_request_optional_fields() {
        let req: RegisterRequest = serde_json::from_str(
            r#"{"service_name":"doctor-service","address":"10.0.0.1","port":8081}"#,
        )
        .unwrap();
        assert!(req.lease_duration.is_none());
        assert!(req.instance_id.is_none());
        assert!(req.metadata.is_empty());
    }
}
