use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode, Url};

use super::error::AgentError;
use crate::services::registry::types::{InstanceInfo, RegisterRequest, RegisterResponse};

/// 注册中心 HTTP 客户端
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
}

impl RegistryClient {
    pub fn new(registry_url: &str, request_timeout: Duration) -> Result<Self, AgentError> {
        let base_url = Url::parse(registry_url)
            .map_err(|e| AgentError::InvalidUrl(format!("{registry_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(AgentError::InvalidUrl(registry_url.to_string()));
        }
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    // 拼接路径并对每一段做编码
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<String, AgentError> {
        let response = self
            .http
            .post(self.url(&["instances"]))
            .json(request)
            .send()
            .await
            .map_err(unavailable)?;
        let response = check(response, &request.service_name, request.instance_id.as_deref().unwrap_or("")).await?;
        let body: RegisterResponse = response.json().await?;
        Ok(body.instance_id)
    }

    pub async fn renew(&self, service_name: &str, instance_id: &str) -> Result<InstanceInfo, AgentError> {
        let response = self
            .http
            .put(self.url(&["instances", service_name, instance_id]))
            .send()
            .await
            .map_err(unavailable)?;
        let response = check(response, service_name, instance_id).await?;
        Ok(response.json().await?)
    }

    pub async fn deregister(&self, service_name: &str, instance_id: &str) -> Result<(), AgentError> {
        let response = self
            .http
            .delete(self.url(&["instances", service_name, instance_id]))
            .send()
            .await
            .map_err(unavailable)?;
        check(response, service_name, instance_id).await?;
        Ok(())
    }

    /// 查询某服务当前可用的实例
    pub async fn query(&self, service_name: &str) -> Result<Vec<InstanceInfo>, AgentError> {
        let response = self
            .http
            .get(self.url(&["instances", service_name]))
            .send()
            .await
            .map_err(unavailable)?;
        let response = check(response, service_name, "").await?;
        Ok(response.json().await?)
    }

    pub async fn query_all(&self) -> Result<BTreeMap<String, Vec<InstanceInfo>>, AgentError> {
        let response = self
            .http
            .get(self.url(&["instances"]))
            .send()
            .await
            .map_err(unavailable)?;
        let response = check(response, "", "").await?;
        Ok(response.json().await?)
    }
}

// 发送失败（连接拒绝、超时等）一律视为注册中心不可达
fn unavailable(e: reqwest::Error) -> AgentError {
    if e.is_timeout() {
        AgentError::Timeout
    } else {
        AgentError::Unavailable(e.to_string())
    }
}

async fn check(response: Response, service_name: &str, instance_id: &str) -> Result<Response, AgentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => AgentError::NotFound {
            service_name: service_name.to_string(),
            instance_id: instance_id.to_string(),
        },
        StatusCode::BAD_REQUEST => AgentError::Validation(body),
        s if s.is_server_error() => AgentError::Unavailable(format!("{s}: {body}")),
        s => AgentError::UnexpectedStatus {
            status: s.as_u16(),
            body,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_encoded_instance_urls() {
        let client = RegistryClient::new("http://127.0.0.1:8761/registry/", Duration::from_secs(1)).unwrap();
        let url = client.url(&["instances", "doctor-service", "10.0.0.1:8081:ab/cd"]);
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8761/registry/instances/doctor-service/10.0.0.1:8081:ab%2Fcd"
        );
    }

    #[test]
    fn rejects_unparsable_url() {
        let err = RegistryClient::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, AgentError::InvalidUrl(_)));
    }
}
