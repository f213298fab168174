use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

use super::error::RegistryError;
use super::lease_store::LeaseStore;
use super::types::InstanceRecord;

/// 续约计数器，每轮清理读取并清零
#[derive(Debug)]
pub struct RenewalMeter {
    renewals: AtomicU64,
    window_start: Mutex<Instant>,
}

impl RenewalMeter {
    pub fn new(now: Instant) -> Self {
        Self {
            renewals: AtomicU64::new(0),
            window_start: Mutex::new(now),
        }
    }

    pub fn record(&self) {
        self.renewals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn current(&self) -> u64 {
        self.renewals.load(Ordering::Relaxed)
    }

    /// 结束当前统计窗口，返回 (窗口内续约数, 窗口起点) 并从 `now` 开始新窗口
    pub fn take_window(&self, now: Instant) -> (u64, Instant) {
        let mut start = match self.window_start.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let renewals = self.renewals.swap(0, Ordering::Relaxed);
        let previous = std::mem::replace(&mut *start, now);
        (renewals, previous)
    }
}

/// 心跳处理器
#[derive(Debug)]
pub struct HeartbeatProcessor {
    store: LeaseStore,
    meter: RenewalMeter,
}

impl HeartbeatProcessor {
    pub fn new(store: LeaseStore) -> Self {
        Self {
            store,
            meter: RenewalMeter::new(Instant::now()),
        }
    }

    /// 续约；返回 NotFound 时客户端必须重新注册
    pub fn process(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> Result<InstanceRecord, RegistryError> {
        match self.store.renew(service_name, instance_id, Instant::now()) {
            Ok(record) => {
                self.meter.record();
                tracing::debug!(
                    service_name = %service_name,
                    instance_id = %instance_id,
                    "Lease renewed"
                );
                Ok(record)
            }
            Err(e) => {
                tracing::debug!(
                    service_name = %service_name,
                    instance_id = %instance_id,
                    "Heartbeat for unknown instance, client must re-register"
                );
                Err(e)
            }
        }
    }

    pub fn meter(&self) -> &RenewalMeter {
        &self.meter
    }
}
