use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::Instant;

use super::error::RegistryError;
use super::types::{InstanceRecord, InstanceStatus, ServiceRegistry};

/// 内存租约表（服务名 -> 实例ID -> 实例）
///
/// 加锁顺序固定为先外层后内层；读操作只返回克隆出的快照，不会把锁带出本结构。
#[derive(Debug, Clone, Default)]
pub struct LeaseStore {
    services: ServiceRegistry,
}

impl LeaseStore {
    pub fn new() -> Self {
        Self {
            services: Arc::new(DashMap::new()),
        }
    }

    /// 插入或替换实例，返回被替换的旧记录
    pub fn put(&self, record: InstanceRecord) -> Option<InstanceRecord> {
        // 持有外层写锁期间写入内层，避免与空服务清理并发时写进已被移除的集合
        self.services
            .entry(record.service_name.clone())
            .or_default()
            .insert(record.instance_id.clone(), record)
    }

    pub fn renew(
        &self,
        service_name: &str,
        instance_id: &str,
        now: Instant,
    ) -> Result<InstanceRecord, RegistryError> {
        let instances = self
            .services
            .get(service_name)
            .ok_or_else(|| RegistryError::not_found(service_name, instance_id))?;
        let mut record = instances
            .get_mut(instance_id)
            .ok_or_else(|| RegistryError::not_found(service_name, instance_id))?;
        record.renew(now);
        Ok(record.clone())
    }

    pub fn set_status(
        &self,
        service_name: &str,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<InstanceRecord, RegistryError> {
        let instances = self
            .services
            .get(service_name)
            .ok_or_else(|| RegistryError::not_found(service_name, instance_id))?;
        let mut record = instances
            .get_mut(instance_id)
            .ok_or_else(|| RegistryError::not_found(service_name, instance_id))?;
        record.status = status;
        Ok(record.clone())
    }

    /// 删除实例，不存在时为空操作
    pub fn remove(&self, service_name: &str, instance_id: &str) -> Option<InstanceRecord> {
        self.remove_where(service_name, instance_id, |_| true)
    }

    /// 在同一把锁内重新检查租约后删除，已被续约的实例会保留
    pub fn remove_if_expired(
        &self,
        service_name: &str,
        instance_id: &str,
        now: Instant,
    ) -> Option<InstanceRecord> {
        self.remove_where(service_name, instance_id, |record| record.is_expired(now))
    }

    fn remove_where<F>(
        &self,
        service_name: &str,
        instance_id: &str,
        predicate: F,
    ) -> Option<InstanceRecord>
    where
        F: Fn(&InstanceRecord) -> bool,
    {
        let removed = {
            let instances = self.services.get(service_name)?;
            instances
                .remove_if(instance_id, |_, record| predicate(record))
                .map(|(_, record)| record)
        };

        if removed.is_some() {
            self.services
                .remove_if(service_name, |_, instances| instances.is_empty());
        }
        removed
    }

    /// 指定服务名时返回该服务的实例，否则返回全部实例
    pub fn snapshot(&self, service_name: Option<&str>) -> Vec<InstanceRecord> {
        match service_name {
            Some(name) => self
                .services
                .get(name)
                .map(|instances| {
                    let records: Vec<_> = instances
                        .iter()
                        .map(|entry| entry.value().clone())
                        .collect();
                    records
                })
                .unwrap_or_default(),
            None => self
                .services
                .iter()
                .flat_map(|service| {
                    let records: Vec<_> = service
                        .value()
                        .iter()
                        .map(|entry| entry.value().clone())
                        .collect();
                    records
                })
                .collect(),
        }
    }

    pub fn get(&self, service_name: &str, instance_id: &str) -> Option<InstanceRecord> {
        let instances = self.services.get(service_name)?;
        let record = instances.get(instance_id)?.value().clone();
        Some(record)
    }

    pub fn instance_count(&self) -> usize {
        self.services.iter().map(|service| service.value().len()).sum()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|service| service.key().clone()).collect()
    }
}
