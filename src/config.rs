use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// 配置文件默认路径，可通过 `REGISTRY_CONFIG` 覆盖
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
/// 环境变量覆盖项的前缀
pub const ENV_PREFIX: &str = "REGISTRY_";

/// 配置加载错误，启动阶段遇到即为致命错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid environment override: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub agent: AgentSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8761".to_string(),
        }
    }
}

/// 注册中心租约相关配置，时间单位均为秒
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 客户端未指定时使用的默认租约时长
    pub lease_duration: u64,
    /// 客户端心跳间隔，用于估算每轮期望收到的续约数
    pub heartbeat_interval: u64,
    /// 过期清理周期
    pub eviction_sweep_interval: u64,
    /// 续约率低于该比例时进入自我保护
    pub self_preservation_threshold: f64,
    pub enable_self_preservation: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lease_duration: 90,
            heartbeat_interval: 30,
            eviction_sweep_interval: 60,
            self_preservation_threshold: 0.85,
            enable_self_preservation: true,
        }
    }
}

impl RegistryConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn eviction_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_sweep_interval)
    }
}

/// 客户端代理配置（`[agent]` 段）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub registry_url: String,
    pub heartbeat_interval: u64,
    pub lease_duration: u64,
    /// 注册中心不可达时单次心跳的最大重试次数
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub request_timeout: u64,
    /// 关闭时注销请求的超时
    pub shutdown_timeout: u64,
    pub instances: Vec<InstanceSettings>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            registry_url: "http://127.0.0.1:8761".to_string(),
            heartbeat_interval: 30,
            lease_duration: 90,
            max_retries: 3,
            retry_backoff_ms: 500,
            request_timeout: 5,
            shutdown_timeout: 5,
            instances: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSettings {
    pub service_name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// 来自环境变量的扁平覆盖项，例如 `REGISTRY_LEASE_DURATION=30`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvOverrides {
    pub bind_address: Option<String>,
    pub lease_duration: Option<u64>,
    pub heartbeat_interval: Option<u64>,
    pub eviction_sweep_interval: Option<u64>,
    pub self_preservation_threshold: Option<f64>,
    pub enable_self_preservation: Option<bool>,
    pub registry_url: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(envy::prefixed(ENV_PREFIX).from_env::<EnvOverrides>()?)
    }
}

impl Config {
    /// 读取配置文件（不存在时使用默认值），叠加环境变量并校验
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(format!("{ENV_PREFIX}CONFIG"))
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&path).exists() {
            let config_str = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            Self::from_toml_str(&config_str)?
        } else {
            tracing::info!(path = %path, "Config file not found, using defaults");
            Self::default()
        };

        config.apply_overrides(EnvOverrides::from_env()?);
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(config_str)?)
    }

    pub fn apply_overrides(&mut self, overrides: EnvOverrides) {
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(lease_duration) = overrides.lease_duration {
            self.registry.lease_duration = lease_duration;
            self.agent.lease_duration = lease_duration;
        }
        if let Some(heartbeat_interval) = overrides.heartbeat_interval {
            self.registry.heartbeat_interval = heartbeat_interval;
            self.agent.heartbeat_interval = heartbeat_interval;
        }
        if let Some(interval) = overrides.eviction_sweep_interval {
            self.registry.eviction_sweep_interval = interval;
        }
        if let Some(threshold) = overrides.self_preservation_threshold {
            self.registry.self_preservation_threshold = threshold;
        }
        if let Some(enabled) = overrides.enable_self_preservation {
            self.registry.enable_self_preservation = enabled;
        }
        if let Some(registry_url) = overrides.registry_url {
            self.agent.registry_url = registry_url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_address()?;

        let registry = &self.registry;
        if registry.lease_duration == 0 {
            return Err(ConfigError::Invalid("registry.lease_duration must be > 0".into()));
        }
        if registry.heartbeat_interval == 0 {
            return Err(ConfigError::Invalid("registry.heartbeat_interval must be > 0".into()));
        }
        if registry.eviction_sweep_interval == 0 {
            return Err(ConfigError::Invalid(
                "registry.eviction_sweep_interval must be > 0".into(),
            ));
        }
        let threshold = registry.self_preservation_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "registry.self_preservation_threshold must be in (0, 1], got {threshold}"
            )));
        }

        let agent = &self.agent;
        if agent.heartbeat_interval == 0 || agent.lease_duration == 0 {
            return Err(ConfigError::Invalid(
                "agent.heartbeat_interval and agent.lease_duration must be > 0".into(),
            ));
        }
        if agent.lease_duration <= agent.heartbeat_interval {
            tracing::warn!(
                lease_duration = agent.lease_duration,
                heartbeat_interval = agent.heartbeat_interval,
                "Agent lease is not longer than its heartbeat interval, leases may expire between heartbeats"
            );
        }
        Ok(())
    }

    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        self.server.bind_address.parse().map_err(|e| {
            ConfigError::Invalid(format!(
                "server.bind_address '{}' is not a socket address: {e}",
                self.server.bind_address
            ))
        })
    }
}
