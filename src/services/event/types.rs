use serde::{Deserialize, Serialize};

use crate::services::registry::types::InstanceStatus;

/// 事件总线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// 广播通道容量，慢订阅者落后超过该值会丢失事件
    pub channel_capacity: usize,
    /// 是否启用事件统计
    pub enable_metrics: bool,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            enable_metrics: true,
        }
    }
}

/// 注册表生命周期事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryEventKind {
    Registered,
    StatusChanged { status: InstanceStatus },
    Deregistered,
    Evicted { overdue_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub service_name: String,
    pub instance_id: String,
    #[serde(flatten)]
    pub kind: RegistryEventKind,
    /// Unix 时间戳（秒）
    pub timestamp: i64,
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 已发布的事件总数
    pub events_published: u64,
    /// 已投递的事件总数
    pub events_delivered: u64,
    pub registrations: u64,
    pub deregistrations: u64,
    pub evictions: u64,
    /// 自我保护生效的清理轮次
    pub suspended_sweeps: u64,
}
