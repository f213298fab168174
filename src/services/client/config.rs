use std::collections::HashMap;
use std::time::Duration;

use crate::config::{AgentSettings, InstanceSettings};

/// 客户端代理配置
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// 注册中心地址
    pub registry_url: String,
    /// 心跳间隔
    pub heartbeat_interval: Duration,
    /// 向注册中心申请的租约时长
    pub lease_duration: Duration,
    /// 单次心跳在注册中心不可达时的最大重试次数
    pub max_retries: u32,
    /// 首次重试的退避时间，之后指数增长
    pub retry_backoff: Duration,
    /// 单个请求超时
    pub request_timeout: Duration,
    /// 关闭时注销请求的超时
    pub shutdown_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from(&AgentSettings::default())
    }
}

impl From<&AgentSettings> for AgentConfig {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            registry_url: settings.registry_url.clone(),
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval),
            lease_duration: Duration::from_secs(settings.lease_duration),
            max_retries: settings.max_retries,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
            request_timeout: Duration::from_secs(settings.request_timeout),
            shutdown_timeout: Duration::from_secs(settings.shutdown_timeout),
        }
    }
}

impl AgentConfig {
    /// 第 `attempt` 次重试前的等待时间，不超过心跳间隔
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.retry_backoff
            .saturating_mul(factor)
            .min(self.heartbeat_interval)
    }
}

/// 代理所代表的服务实例
#[derive(Debug, Clone)]
pub struct InstanceDescriptor {
    pub service_name: String,
    pub address: String,
    pub port: u16,
    pub metadata: HashMap<String, String>,
}

impl InstanceDescriptor {
    pub fn new(service_name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            address: address.into(),
            port,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<&InstanceSettings> for InstanceDescriptor {
    fn from(settings: &InstanceSettings) -> Self {
        Self {
            service_name: settings.service_name.clone(),
            address: settings.address.clone(),
            port: settings.port,
            metadata: settings.metadata.clone(),
        }
    }
}
