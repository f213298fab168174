/// 客户端代理错误类型
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Invalid registry url: {0}")]
    InvalidUrl(String),
    #[error("Registry unavailable: {0}")]
    Unavailable(String),
    #[error("Instance not found: {service_name}/{instance_id}")]
    NotFound {
        service_name: String,
        instance_id: String,
    },
    #[error("Registration rejected: {0}")]
    Validation(String),
    #[error("Unexpected registry response {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("Timeout error")]
    Timeout,
}

impl AgentError {
    /// 注册中心不可达或暂时故障，可以按同一条记录重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Unavailable(_) | AgentError::Timeout)
    }
}
