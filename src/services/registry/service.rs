use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::error::RegistryError;
use super::heartbeat::HeartbeatProcessor;
use super::lease_store::LeaseStore;
use super::sweeper::{EvictionSweeper, SweepReport};
use super::types::{InstanceInfo, InstanceRecord, InstanceStatus, RegisterRequest};
use crate::config::RegistryConfig;
use crate::services::event::{EventBus, RegistryEvent, RegistryEventKind};

// 注册中心服务，组合租约表、心跳处理器与清理器
#[derive(Debug)]
pub struct RegistryService {
    store: LeaseStore,
    heartbeat: Arc<HeartbeatProcessor>,
    sweeper: Arc<EvictionSweeper>,
    events: EventBus,
    config: RegistryConfig,
}

impl RegistryService {
    pub fn new(store: LeaseStore, config: RegistryConfig) -> Self {
        Self::with_events(store, config, EventBus::default())
    }

    pub fn with_events(store: LeaseStore, config: RegistryConfig, events: EventBus) -> Self {
        let heartbeat = Arc::new(HeartbeatProcessor::new(store.clone()));
        let sweeper = Arc::new(EvictionSweeper::new(
            store.clone(),
            heartbeat.clone(),
            events.clone(),
            config.clone(),
        ));
        Self {
            store,
            heartbeat,
            sweeper,
            events,
            config,
        }
    }

    /// 启动定期清理任务
    pub fn start_sweeper(&self, tracker: &TaskTracker, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.config.eviction_sweep_interval,
            self_preservation = self.config.enable_self_preservation,
            threshold = self.config.self_preservation_threshold,
            "Starting eviction sweeper"
        );
        self.sweeper.clone().spawn(tracker, shutdown);
    }

    /// 立即执行一轮清理
    pub fn sweep(&self) -> Result<SweepReport, RegistryError> {
        self.sweeper.sweep()
    }

    /// 注册实例，返回实例ID；同一实例ID重复注册时覆盖旧记录
    pub fn register(&self, request: RegisterRequest) -> Result<String, RegistryError> {
        let service_name = request.service_name.trim();
        let address = request.address.trim();
        if service_name.is_empty() {
            return Err(RegistryError::Validation("service_name is required".into()));
        }
        if address.is_empty() {
            return Err(RegistryError::Validation("address is required".into()));
        }
        if request.port == 0 {
            return Err(RegistryError::Validation("port must be non-zero".into()));
        }
        let lease_secs = request.lease_duration.unwrap_or(self.config.lease_duration);
        if lease_secs == 0 {
            return Err(RegistryError::Validation("lease_duration must be > 0".into()));
        }

        let instance_id = match request.instance_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => InstanceRecord::generate_id(address, request.port),
        };

        let now = Instant::now();
        let record = InstanceRecord {
            instance_id: instance_id.clone(),
            service_name: service_name.to_string(),
            address: address.to_string(),
            port: request.port,
            status: request.status.unwrap_or(InstanceStatus::Up),
            lease_duration: Duration::from_secs(lease_secs),
            registered_at: now,
            last_renewal_timestamp: now,
            metadata: request.metadata,
        };

        tracing::info!(
            service_name = %record.service_name,
            instance_id = %instance_id,
            address = %record.address,
            port = record.port,
            status = %record.status,
            lease_secs,
            "Registering instance"
        );

        let service_name = record.service_name.clone();
        if let Some(previous) = self.store.put(record) {
            tracing::debug!(
                service_name = %service_name,
                instance_id = %instance_id,
                previous_address = %previous.address,
                previous_port = previous.port,
                "Replaced existing registration"
            );
        }
        self.events
            .publish(&service_name, &instance_id, RegistryEventKind::Registered);
        Ok(instance_id)
    }

    pub fn renew(&self, service_name: &str, instance_id: &str) -> Result<InstanceInfo, RegistryError> {
        let record = self.heartbeat.process(service_name, instance_id)?;
        Ok(record.to_info(Instant::now()))
    }

    /// 注销实例，幂等；返回实例此前是否存在
    pub fn deregister(&self, service_name: &str, instance_id: &str) -> bool {
        match self.store.remove(service_name, instance_id) {
            Some(_) => {
                tracing::info!(service_name = %service_name, instance_id = %instance_id, "Deregistered instance");
                self.events
                    .publish(service_name, instance_id, RegistryEventKind::Deregistered);
                true
            }
            None => {
                tracing::debug!(service_name = %service_name, instance_id = %instance_id, "Deregister for unknown instance ignored");
                false
            }
        }
    }

    // 手动更新实例状态
    pub fn update_status(
        &self,
        service_name: &str,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<InstanceInfo, RegistryError> {
        let record = self.store.set_status(service_name, instance_id, status)?;
        tracing::info!(service_name = %service_name, instance_id = %instance_id, new_status = %status, "Updated instance status");
        self.events.publish(
            service_name,
            instance_id,
            RegistryEventKind::StatusChanged { status },
        );
        Ok(record.to_info(Instant::now()))
    }

    /// 查询某服务当前 UP 的实例，按实例ID排序
    pub fn query(&self, service_name: &str) -> Vec<InstanceInfo> {
        let now = Instant::now();
        let mut instances: Vec<InstanceInfo> = self
            .store
            .snapshot(Some(service_name))
            .into_iter()
            .filter(|record| record.status == InstanceStatus::Up)
            .map(|record| record.to_info(now))
            .collect();
        instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        instances
    }

    /// 完整注册表快照，按服务名分组
    pub fn query_all(&self) -> BTreeMap<String, Vec<InstanceInfo>> {
        let now = Instant::now();
        let mut grouped: BTreeMap<String, Vec<InstanceInfo>> = BTreeMap::new();
        for record in self.store.snapshot(None) {
            grouped
                .entry(record.service_name.clone())
                .or_default()
                .push(record.to_info(now));
        }
        for instances in grouped.values_mut() {
            instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        }
        grouped
    }

    pub fn subscribe(&self) -> impl Stream<Item = RegistryEvent> + Send + use<> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &LeaseStore {
        &self.store
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}
