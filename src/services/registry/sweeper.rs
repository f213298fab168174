use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::error::RegistryError;
use super::heartbeat::HeartbeatProcessor;
use super::lease_store::LeaseStore;
use super::types::InstanceRecord;
use crate::config::RegistryConfig;
use crate::services::event::{EventBus, RegistryEventKind};

/// 单轮清理结果
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub evicted: Vec<InstanceRecord>,
    pub renewals: u64,
    pub expected_renewals: u64,
}

/// 过期租约清理器
#[derive(Debug)]
pub struct EvictionSweeper {
    store: LeaseStore,
    heartbeat: Arc<HeartbeatProcessor>,
    events: EventBus,
    config: RegistryConfig,
}

impl EvictionSweeper {
    pub fn new(
        store: LeaseStore,
        heartbeat: Arc<HeartbeatProcessor>,
        events: EventBus,
        config: RegistryConfig,
    ) -> Self {
        Self {
            store,
            heartbeat,
            events,
            config,
        }
    }

    /// 估算窗口内应收到的续约数：每个实例按其在窗口内存活的时长除以心跳间隔累加
    ///
    /// 窗口开始前租约就已到期的实例不计入。
    pub fn expected_renewals(
        records: &[InstanceRecord],
        window_start: Instant,
        now: Instant,
        heartbeat_interval: Duration,
    ) -> u64 {
        let interval_ms = heartbeat_interval.as_millis();
        if interval_ms == 0 {
            return 0;
        }
        let alive_ms: u128 = records
            .iter()
            .filter(|record| record.last_renewal_timestamp + record.lease_duration >= window_start)
            .map(|record| {
                let since = window_start.max(record.registered_at);
                now.saturating_duration_since(since).as_millis()
            })
            .sum();
        (alive_ms / interval_ms) as u64
    }

    /// 执行一轮清理
    ///
    /// 续约率低于阈值时返回 `SelfPreservationSuspended`，本轮不删除任何实例。
    pub fn sweep(&self) -> Result<SweepReport, RegistryError> {
        let now = Instant::now();
        let (renewals, window_start) = self.heartbeat.meter().take_window(now);
        let records = self.store.snapshot(None);
        let expected = Self::expected_renewals(
            &records,
            window_start,
            now,
            self.config.heartbeat_interval(),
        );

        let expired: Vec<&InstanceRecord> = records.iter().filter(|r| r.is_expired(now)).collect();
        let mut report = SweepReport {
            evicted: Vec::new(),
            renewals,
            expected_renewals: expected,
        };
        if expired.is_empty() {
            return Ok(report);
        }

        if self.config.enable_self_preservation
            && expected > 0
            && (renewals as f64) < expected as f64 * self.config.self_preservation_threshold
        {
            self.events.record_suspended_sweep();
            return Err(RegistryError::SelfPreservationSuspended {
                renewals,
                expected,
                expired: expired.len(),
            });
        }

        for candidate in expired {
            // 快照之后可能已被续约，删除时重新判断
            let Some(record) =
                self.store
                    .remove_if_expired(&candidate.service_name, &candidate.instance_id, now)
            else {
                continue;
            };

            let overdue = now
                .saturating_duration_since(record.last_renewal_timestamp)
                .saturating_sub(record.lease_duration);
            tracing::warn!(
                service_name = %record.service_name,
                instance_id = %record.instance_id,
                overdue_ms = overdue.as_millis() as u64,
                lease_secs = record.lease_duration.as_secs(),
                "Instance lease expired, evicted from registry"
            );
            self.events.publish(
                &record.service_name,
                &record.instance_id,
                RegistryEventKind::Evicted {
                    overdue_ms: overdue.as_millis() as u64,
                },
            );
            report.evicted.push(record);
        }

        if !report.evicted.is_empty() {
            tracing::info!(
                evicted_count = report.evicted.len(),
                remaining = self.store.instance_count(),
                "Eviction sweep completed"
            );
        }
        Ok(report)
    }

    /// 启动定期清理任务，取消令牌触发后退出
    pub fn spawn(self: Arc<Self>, tracker: &TaskTracker, shutdown: CancellationToken) {
        let period = self.config.eviction_sweep_interval();
        tracker.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Eviction sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        tracing::debug!("Executing lease expiration check...");
                        match self.sweep() {
                            Ok(_) => {}
                            Err(e @ RegistryError::SelfPreservationSuspended { .. }) => {
                                tracing::warn!(error = %e, "Self-preservation engaged, skipping evictions this cycle");
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Eviction sweep failed");
                            }
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registry::lease_store::tests::record;

    fn sweeper(store: &LeaseStore, config: RegistryConfig) -> (EvictionSweeper, Arc<HeartbeatProcessor>) {
        let heartbeat = Arc::new(HeartbeatProcessor::new(store.clone()));
        let sweeper = EvictionSweeper::new(store.clone(), heartbeat.clone(), EventBus::default(), config);
        (sweeper, heartbeat)
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_expired_is_a_noop() {
        let store = LeaseStore::new();
        store.put(record("doctor-service", "a", 90));
        let (sweeper, _) = sweeper(&store, RegistryConfig::default());

        tokio::time::advance(Duration::from_secs(60)).await;
        let report = sweeper.sweep().unwrap();
        assert!(report.evicted.is_empty());
        assert_eq!(store.instance_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_expired_when_renewal_rate_is_healthy() {
        let store = LeaseStore::new();
        store.put(record("doctor-service", "dead", 10));
        for i in 0..9 {
            store.put(record("patient-service", &format!("p{i}"), 10));
        }
        let (sweeper, heartbeat) = sweeper(&store, RegistryConfig {
            heartbeat_interval: 5,
            ..RegistryConfig::default()
        });

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(5)).await;
            for i in 0..9 {
                heartbeat.process("patient-service", &format!("p{i}")).unwrap();
            }
        }
        tokio::time::advance(Duration::from_secs(1)).await;

        // 期望 floor(10 * 16 / 5) = 32，实际 27，比例 0.84 < 0.85
        let err = sweeper.sweep().unwrap_err();
        assert!(matches!(err, RegistryError::SelfPreservationSuspended { expired: 1, .. }));
        assert_eq!(store.instance_count(), 10);

        // 新窗口内续约恢复正常
        tokio::time::advance(Duration::from_secs(4)).await;
        for i in 0..9 {
            heartbeat.process("patient-service", &format!("p{i}")).unwrap();
        }
        let report = sweeper.sweep().unwrap();
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(report.evicted[0].instance_id, "dead");
        assert!(store.get("doctor-service", "dead").is_none());
        assert_eq!(store.instance_count(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn self_preservation_blocks_mass_expiry() {
        let store = LeaseStore::new();
        for i in 0..5 {
            store.put(record("doctor-service", &format!("d{i}"), 90));
        }
        let (sweeper, _) = sweeper(&store, RegistryConfig::default());

        tokio::time::advance(Duration::from_secs(91)).await;
        let err = sweeper.sweep().unwrap_err();
        match err {
            RegistryError::SelfPreservationSuspended { renewals, expected, expired } => {
                assert_eq!(renewals, 0);
                assert_eq!(expected, 15);
                assert_eq!(expired, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.instance_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_self_preservation_always_evicts() {
        let store = LeaseStore::new();
        store.put(record("doctor-service", "a", 90));
        let (sweeper, _) = sweeper(&store, RegistryConfig {
            enable_self_preservation: false,
            ..RegistryConfig::default()
        });

        tokio::time::advance(Duration::from_secs(91)).await;
        let report = sweeper.sweep().unwrap();
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(store.instance_count(), 0);
    }

    #[test]
    fn expected_renewals_ignore_time_before_registration() {
        let now = Instant::now() + Duration::from_secs(300);
        let mut early = record("doctor-service", "a", 90);
        early.registered_at = now - Duration::from_secs(120);
        early.last_renewal_timestamp = early.registered_at;
        let mut late = record("doctor-service", "b", 90);
        late.registered_at = now - Duration::from_secs(30);
        late.last_renewal_timestamp = late.registered_at;

        let expected = EvictionSweeper::expected_renewals(
            &[early, late],
            now - Duration::from_secs(60),
            now,
            Duration::from_secs(30),
        );
        assert_eq!(expected, 3);
    }

    #[test]
    fn expected_renewals_skip_leases_expired_before_window() {
        let now = Instant::now() + Duration::from_secs(600);
        let window_start = now - Duration::from_secs(60);
        let mut live = record("doctor-service", "live", 90);
        live.registered_at = now - Duration::from_secs(300);
        live.last_renewal_timestamp = now - Duration::from_secs(10);
        // 租约在窗口开始前 30 秒就已到期
        let mut dead = record("doctor-service", "dead", 90);
        dead.registered_at = now - Duration::from_secs(300);
        dead.last_renewal_timestamp = now - Duration::from_secs(180);

        let expected = EvictionSweeper::expected_renewals(
            &[live, dead],
            window_start,
            now,
            Duration::from_secs(30),
        );
        assert_eq!(expected, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_minority_is_evicted_while_peers_heartbeat() {
        let store = LeaseStore::new();
        for i in 0..8 {
            store.put(record("doctor-service", &format!("d{i}"), 90));
        }
        store.put(record("patient-service", "dead-0", 90));
        store.put(record("patient-service", "dead-1", 90));
        let (sweeper, heartbeat) = sweeper(&store, RegistryConfig::default());

        // 默认配置：30 秒心跳，60 秒清理一次，共运行 10 分钟
        let mut evicted_at = None;
        for minute in 1..=10 {
            for _ in 0..2 {
                tokio::time::advance(Duration::from_secs(30)).await;
                for i in 0..8 {
                    heartbeat.process("doctor-service", &format!("d{i}")).unwrap();
                }
            }
            match sweeper.sweep() {
                Ok(report) if !report.evicted.is_empty() => {
                    assert_eq!(report.evicted.len(), 2);
                    assert!(evicted_at.is_none());
                    evicted_at = Some(minute);
                }
                Ok(_) => {}
                // 到期后的第一轮：2/10 同时失联，先保护一轮
                Err(RegistryError::SelfPreservationSuspended { renewals, expected, expired }) => {
                    assert_eq!(minute, 2);
                    assert_eq!((renewals, expected, expired), (16, 20, 2));
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(evicted_at, Some(3));
        assert_eq!(store.instance_count(), 8);
        assert!(store.snapshot(Some("patient-service")).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweeper_stops_on_cancel() {
        let store = LeaseStore::new();
        let (sweeper, _) = sweeper(&store, RegistryConfig::default());
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();

        Arc::new(sweeper).spawn(&tracker, shutdown.clone());
        tracker.close();
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait())
            .await
            .expect("sweeper task did not stop");
    }
}
