use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::config::{AgentConfig, InstanceDescriptor};
use super::error::AgentError;
use super::registry_client::RegistryClient;
use crate::services::registry::types::{InstanceRecord, InstanceStatus, RegisterRequest};

/// 代理本地维护的租约副本，只用于决定何时重新发送心跳
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentState {
    pub registered: bool,
    pub last_renewal: Option<Instant>,
    pub consecutive_failures: u32,
    pub registrations: u64,
}

/// 运行在服务实例内部的注册代理：启动时注册、定期心跳、关闭时注销
#[derive(Debug)]
pub struct ClientAgent {
    client: RegistryClient,
    service_name: String,
    instance_id: String,
    config: AgentConfig,
    state: watch::Receiver<AgentState>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl ClientAgent {
    /// 注册并启动心跳任务
    ///
    /// 注册中心暂时不可达不会导致失败，心跳任务会在其恢复后完成注册；
    /// 只有自身记录被拒绝（校验失败）时返回错误。
    pub async fn start(config: AgentConfig, instance: InstanceDescriptor) -> Result<Self, AgentError> {
        let client = RegistryClient::new(&config.registry_url, config.request_timeout)?;
        let instance_id = InstanceRecord::generate_id(&instance.address, instance.port);
        let request = RegisterRequest {
            service_name: instance.service_name.clone(),
            address: instance.address,
            port: instance.port,
            lease_duration: Some(config.lease_duration.as_secs().max(1)),
            instance_id: Some(instance_id.clone()),
            status: Some(InstanceStatus::Up),
            metadata: instance.metadata,
        };

        let (state_tx, state_rx) = watch::channel(AgentState::default());
        match client.register(&request).await {
            Ok(_) => {
                tracing::info!(
                    service_name = %request.service_name,
                    instance_id = %instance_id,
                    registry = %client.base_url(),
                    "Registered with registry"
                );
                state_tx.send_modify(|state| {
                    state.registered = true;
                    state.last_renewal = Some(Instant::now());
                    state.registrations += 1;
                });
            }
            Err(AgentError::Validation(reason)) => return Err(AgentError::Validation(reason)),
            Err(e) => {
                tracing::warn!(
                    service_name = %request.service_name,
                    instance_id = %instance_id,
                    error = %e,
                    "Registry unreachable at startup, registration will be retried on next heartbeat"
                );
            }
        }

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let heartbeat = HeartbeatLoop {
            client: client.clone(),
            request,
            config: config.clone(),
            state: state_tx,
            shutdown: shutdown.clone(),
        };
        tracker.spawn(heartbeat.run());
        tracker.close();

        Ok(Self {
            client,
            service_name: instance.service_name,
            instance_id,
            config,
            state: state_rx,
            shutdown,
            tracker,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn state(&self) -> AgentState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.state.clone()
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    /// 停止心跳并在超时内尽力注销
    pub async fn shutdown(self) -> Result<(), AgentError> {
        self.shutdown.cancel();
        self.tracker.wait().await;

        let deregister = self.client.deregister(&self.service_name, &self.instance_id);
        match tokio::time::timeout(self.config.shutdown_timeout, deregister).await {
            Ok(Ok(())) => {
                tracing::info!(
                    service_name = %self.service_name,
                    instance_id = %self.instance_id,
                    "Deregistered from registry"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    service_name = %self.service_name,
                    instance_id = %self.instance_id,
                    error = %e,
                    "Failed to deregister, lease will expire on the registry"
                );
                Err(e)
            }
            Err(_) => {
                tracing::warn!(
                    service_name = %self.service_name,
                    instance_id = %self.instance_id,
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "Deregistration timed out, lease will expire on the registry"
                );
                Err(AgentError::Timeout)
            }
        }
    }
}

impl Drop for ClientAgent {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct HeartbeatLoop {
    client: RegistryClient,
    request: RegisterRequest,
    config: AgentConfig,
    state: watch::Sender<AgentState>,
    shutdown: CancellationToken,
}

impl HeartbeatLoop {
    async fn run(self) {
        let period = self.config.heartbeat_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    // 请求进行中也要能及时响应关闭
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = self.beat() => {}
                    }
                }
            }
        }
        tracing::debug!(
            service_name = %self.request.service_name,
            "Heartbeat loop stopped"
        );
    }

    // 一次心跳：未注册则注册，否则续约；NotFound 立即重新注册，不可达时有限次重试
    async fn beat(&self) {
        let service_name = self.request.service_name.as_str();
        let instance_id = self.request.instance_id.as_deref().unwrap_or_default();
        let mut attempt = 0u32;

        loop {
            let registered = self.state.borrow().registered;
            let result = if registered {
                self.client.renew(service_name, instance_id).await.map(|_| ())
            } else {
                self.client.register(&self.request).await.map(|_| ())
            };

            match result {
                Ok(()) => {
                    if !registered {
                        tracing::info!(
                            service_name = %service_name,
                            instance_id = %instance_id,
                            "Registered with registry"
                        );
                    }
                    self.state.send_modify(|state| {
                        if !state.registered {
                            state.registrations += 1;
                        }
                        state.registered = true;
                        state.last_renewal = Some(Instant::now());
                        state.consecutive_failures = 0;
                    });
                    return;
                }
                Err(AgentError::NotFound { .. }) if registered => {
                    tracing::warn!(
                        service_name = %service_name,
                        instance_id = %instance_id,
                        "Registry does not know this instance, re-registering"
                    );
                    self.state.send_modify(|state| state.registered = false);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let backoff = self.config.backoff(attempt);
                    attempt += 1;
                    tracing::debug!(
                        service_name = %service_name,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Heartbeat failed, retrying"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    self.state
                        .send_modify(|state| state.consecutive_failures += 1);
                    tracing::warn!(
                        service_name = %service_name,
                        instance_id = %instance_id,
                        attempts = attempt + 1,
                        consecutive_failures = self.state.borrow().consecutive_failures,
                        error = %e,
                        "Heartbeat failed persistently, will try again next interval"
                    );
                    return;
                }
            }
        }
    }
}
