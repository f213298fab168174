use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use super::types::{EventConfig, EventStats, RegistryEvent, RegistryEventKind};

/// 基于 Tokio broadcast 的注册表事件总线
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RegistryEvent>,
    /// 事件统计
    stats: Arc<Mutex<EventStats>>,
    config: EventConfig,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventConfig::default())
    }
}

impl EventBus {
    pub fn new(config: EventConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            stats: Arc::new(Mutex::new(EventStats::default())),
            config,
        }
    }

    /// 发布事件，返回收到事件的订阅者数量；没有订阅者不算错误
    pub fn publish(&self, service_name: &str, instance_id: &str, kind: RegistryEventKind) -> usize {
        let event = RegistryEvent {
            service_name: service_name.to_string(),
            instance_id: instance_id.to_string(),
            kind,
            timestamp: SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64,
        };

        if self.config.enable_metrics {
            if let Ok(mut stats) = self.stats.lock() {
                stats.events_published += 1;
                match event.kind {
                    RegistryEventKind::Registered => stats.registrations += 1,
                    RegistryEventKind::Deregistered => stats.deregistrations += 1,
                    RegistryEventKind::Evicted { .. } => stats.evictions += 1,
                    RegistryEventKind::StatusChanged { .. } => {}
                }
            }
        }

        let delivered = self.sender.send(event).unwrap_or(0);
        if self.config.enable_metrics && delivered > 0 {
            if let Ok(mut stats) = self.stats.lock() {
                stats.events_delivered += delivered as u64;
            }
        }
        delivered
    }

    pub fn record_suspended_sweep(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.suspended_sweeps += 1;
        }
    }

    /// 订阅全部事件，落后过多时跳过丢失的事件继续接收
    pub fn subscribe(&self) -> impl Stream<Item = RegistryEvent> + Send + use<> {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|result| match result {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(error = %e, "Registry event subscriber lagged behind");
                None
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn get_stats(&self) -> EventStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }
}
