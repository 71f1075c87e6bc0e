//! 清理与健康监控
//!
//! 四个互不依赖的定时任务：连接巡检、房间回收、统计日志、内存告警。
//! 每个任务只通过注册表和房间管理器的公开操作读写共享状态。

use std::sync::Arc;
use std::time::Duration;

use config::MonitorConfig;
use domain::{RealtimeEvent, Severity};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcaster::EventPublisher;
use crate::hub::{HubStats, RealtimeHub};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// 进程内存采样
#[cfg_attr(test, mockall::automock)]
pub trait MemoryProbe: Send + Sync {
    /// 当前常驻内存字节数，无法采样时返回 `None`
    fn resident_bytes(&self) -> Option<u64>;
}

/// 定时任务参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub connection_sweep: Duration,
    pub room_sweep: Duration,
    pub room_idle_secs: i64,
    pub stats_interval: Duration,
    pub memory_check: Duration,
    pub memory_threshold_mb: u64,
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            connection_sweep: Duration::from_secs(config.connection_sweep_secs),
            room_sweep: Duration::from_secs(config.room_sweep_secs),
            room_idle_secs: i64::try_from(config.room_idle_secs).unwrap_or(i64::MAX),
            stats_interval: Duration::from_secs(config.stats_interval_secs),
            memory_check: Duration::from_secs(config.memory_check_secs),
            memory_threshold_mb: config.memory_threshold_mb,
        }
    }
}

pub struct HealthMonitor {
    hub: Arc<RealtimeHub>,
    publisher: EventPublisher,
    probe: Arc<dyn MemoryProbe>,
    settings: MonitorSettings,
}

impl HealthMonitor {
    pub fn new(
        hub: Arc<RealtimeHub>,
        publisher: EventPublisher,
        probe: Arc<dyn MemoryProbe>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            hub,
            publisher,
            probe,
            settings,
        }
    }

    /// 移除传输已断开的连接，同时清理过期的限流计数器
    pub fn sweep_connections(&self) -> usize {
        let removed = self.hub.registry().sweep_dead();
        let expired = self.hub.limiter().cleanup_expired();
        if expired > 0 {
            info!("Cleaned up {} expired rate limit counters", expired);
        }
        removed
    }

    /// 回收空闲的空房间
    pub fn sweep_rooms(&self) -> usize {
        let registry = self.hub.registry();
        let orphans = self.hub.rooms().prune_orphans(|id| registry.contains(id));
        if orphans > 0 {
            warn!("Pruned memberships of {} unregistered connections", orphans);
        }
        self.hub.rooms().sweep_idle(self.settings.room_idle_secs)
    }

    pub fn log_stats(&self) -> HubStats {
        let stats = self.hub.stats();
        info!(
            connections = stats.connections,
            identities = stats.identities,
            rooms = stats.rooms,
            persistent_rooms = stats.persistent_rooms,
            memberships = stats.memberships,
            "realtime hub stats"
        );
        stats
    }

    /// 内存超过阈值时发布告警，返回超标时的用量（MB）
    pub fn check_memory(&self) -> Option<u64> {
        let used_mb = self.probe.resident_bytes()? / BYTES_PER_MB;
        if used_mb <= self.settings.memory_threshold_mb {
            return None;
        }

        warn!(
            used_mb,
            threshold_mb = self.settings.memory_threshold_mb,
            "memory usage above threshold"
        );
        let alert = RealtimeEvent::system_notification(
            Severity::Warning,
            "High memory usage",
            format!(
                "Realtime server is using {} MB (threshold {} MB)",
                used_mb, self.settings.memory_threshold_mb
            ),
        );
        if let Err(e) = self.publisher.try_publish(alert) {
            warn!("failed to publish memory alert: {}", e);
        }
        Some(used_mb)
    }

    /// 启动四个定时任务，取消令牌触发后退出
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let settings = self.settings.clone();
        vec![
            spawn_timer("connection-sweep", settings.connection_sweep, shutdown.clone(), {
                let monitor = self.clone();
                move || {
                    monitor.sweep_connections();
                }
            }),
            spawn_timer("room-sweep", settings.room_sweep, shutdown.clone(), {
                let monitor = self.clone();
                move || {
                    monitor.sweep_rooms();
                }
            }),
            spawn_timer("stats", settings.stats_interval, shutdown.clone(), {
                let monitor = self.clone();
                move || {
                    monitor.log_stats();
                }
            }),
            spawn_timer("memory-check", settings.memory_check, shutdown, {
                let monitor = self;
                move || {
                    monitor.check_memory();
                }
            }),
        ]
    }
}

fn spawn_timer<F>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let period = period.max(Duration::from_millis(1));
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => tick(),
            }
        }
        info!(task = name, "monitor task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::publish_queue;
    use crate::clock::ManualClock;
    use crate::testing::RecordingTransport;
    use chrono::Utc;
    use config::AppConfig;
    use domain::{BranchId, Connection, EventType, Identity, Namespace, Role, RoomKind, RoomScope, UserId};
    use tokio::sync::mpsc;

    struct Fixture {
        hub: Arc<RealtimeHub>,
        clock: Arc<ManualClock>,
        receiver: mpsc::Receiver<RealtimeEvent>,
        monitor: Arc<HealthMonitor>,
    }

    fn fixture(probe: MockMemoryProbe) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = AppConfig::default();
        let hub = Arc::new(RealtimeHub::new(&config, clock.clone()));
        let (publisher, receiver) = publish_queue(8);
        let monitor = Arc::new(HealthMonitor::new(
            hub.clone(),
            publisher,
            Arc::new(probe),
            MonitorSettings::from(&config.monitor),
        ));
        Fixture {
            hub,
            clock,
            receiver,
            monitor,
        }
    }

    fn connect(hub: &RealtimeHub, user: &str) -> Arc<RecordingTransport> {
        let identity = Identity::new(user, user, Role::Staff, Some(BranchId::from("B1")));
        let connection = Connection::new(identity, Namespace::General, Utc::now());
        let transport = Arc::new(RecordingTransport::new());
        hub.registry().add(connection.clone(), transport.clone());
        hub.registry().auto_join(&connection);
        transport
    }

    #[test]
    fn connection_sweep_removes_dead_and_expired_counters() {
        let f = fixture(MockMemoryProbe::new());
        connect(&f.hub, "s1");
        let dead = connect(&f.hub, "s2");
        dead.disconnect();
        f.hub.limiter().admit(&UserId::from("s2"));

        assert_eq!(f.monitor.sweep_connections(), 1);
        assert_eq!(f.hub.registry().len(), 1);
        assert_eq!(f.hub.limiter().tracked(), 1);

        f.clock.advance(chrono::Duration::minutes(5));
        f.monitor.sweep_connections();
        assert_eq!(f.hub.limiter().tracked(), 0);
    }

    #[test]
    fn room_sweep_keeps_persistent_and_occupied_rooms() {
        let f = fixture(MockMemoryProbe::new());
        connect(&f.hub, "s1");
        f.hub
            .rooms()
            .create_room("sync:dashboard", RoomKind::Sync, RoomScope::default());

        f.clock.advance(chrono::Duration::hours(2));
        assert_eq!(f.monitor.sweep_rooms(), 1);
        assert!(!f.hub.rooms().exists("sync:dashboard"));
        assert!(f.hub.rooms().exists("branch:B1"));
        assert!(f.hub.rooms().exists("role:staff"));
    }

    #[test]
    fn stats_reflect_hub_state() {
        let f = fixture(MockMemoryProbe::new());
        connect(&f.hub, "s1");
        connect(&f.hub, "s2");
        let stats = f.monitor.log_stats();
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.identities, 2);
    }

    #[test]
    fn memory_alert_is_published_above_threshold() {
        let mut probe = MockMemoryProbe::new();
        probe
            .expect_resident_bytes()
            .times(1)
            .returning(|| Some(600 * BYTES_PER_MB));
        let mut f = fixture(probe);

        assert_eq!(f.monitor.check_memory(), Some(600));
        let alert = f.receiver.try_recv().unwrap();
        assert_eq!(alert.event_type(), EventType::SystemNotification);
        assert!(alert.targets().rooms.contains(&"system:notifications".to_string()));
    }

    #[test]
    fn memory_below_threshold_is_quiet() {
        let mut probe = MockMemoryProbe::new();
        probe
            .expect_resident_bytes()
            .returning(|| Some(100 * BYTES_PER_MB));
        let mut f = fixture(probe);

        assert_eq!(f.monitor.check_memory(), None);
        assert!(f.receiver.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timers_run_until_cancelled() {
        let mut probe = MockMemoryProbe::new();
        probe.expect_resident_bytes().returning(|| None);
        let f = fixture(probe);
        let dead = connect(&f.hub, "s1");
        dead.disconnect();

        let shutdown = CancellationToken::new();
        let handles = f.monitor.clone().spawn(shutdown.clone());
        assert_eq!(handles.len(), 4);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(f.hub.registry().len(), 0);

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
