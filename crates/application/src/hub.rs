//! 实时推送中枢
//!
//! 持有注册表、房间管理器与限流器，启动时构造一次，按引用传给所有组件，
//! 停机时统一关闭连接。

use std::sync::Arc;

use config::AppConfig;
use serde::Serialize;
use tracing::info;

use crate::broadcaster::EventBroadcaster;
use crate::clock::Clock;
use crate::rate_limiter::ConnectionRateLimiter;
use crate::registry::ConnectionRegistry;
use crate::room_manager::RoomManager;

/// 聚合统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub connections: usize,
    pub identities: usize,
    pub rooms: usize,
    pub persistent_rooms: usize,
    pub memberships: usize,
    pub rate_limited_identities: usize,
}

pub struct RealtimeHub {
    clock: Arc<dyn Clock>,
    rooms: Arc<RoomManager>,
    registry: Arc<ConnectionRegistry>,
    limiter: Arc<ConnectionRateLimiter>,
    broadcaster: Arc<EventBroadcaster>,
}

impl RealtimeHub {
    pub fn new(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        let rooms = Arc::new(RoomManager::new(clock.clone()));
        let registry = Arc::new(ConnectionRegistry::new(rooms.clone()));
        let limiter = Arc::new(ConnectionRateLimiter::from_config(
            &config.rate_limit,
            clock.clone(),
        ));
        let broadcaster = Arc::new(EventBroadcaster::new(registry.clone()));

        Self {
            clock,
            rooms,
            registry,
            limiter,
            broadcaster,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn limiter(&self) -> &Arc<ConnectionRateLimiter> {
        &self.limiter
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    pub fn stats(&self) -> HubStats {
        let rooms = self.rooms.stats();
        HubStats {
            connections: self.registry.len(),
            identities: self.registry.identity_count(),
            rooms: rooms.rooms,
            persistent_rooms: rooms.persistent_rooms,
            memberships: rooms.memberships,
            rate_limited_identities: self.limiter.tracked(),
        }
    }

    /// 关闭所有连接
    pub fn shutdown(&self) {
        let closed = self.registry.close_all();
        info!("Realtime hub shut down, closed {} connections", closed);
    }
}
