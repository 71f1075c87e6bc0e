//! 应用层实现。
//!
//! 连接注册表、房间管理、事件广播、握手限流与定时清理，
//! 以及对身份解析、内存采样等外部适配器的抽象。

pub mod auth;
pub mod broadcaster;
pub mod clock;
pub mod error;
pub mod hub;
pub mod monitor;
pub mod rate_limiter;
pub mod registry;
pub mod room_manager;
pub mod services;

#[cfg(test)]
mod testing;

pub use auth::IdentityResolver;
pub use broadcaster::{publish_queue, EventBroadcaster, EventPublisher, PublishOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::HandshakeError;
pub use hub::{HubStats, RealtimeHub};
pub use monitor::{HealthMonitor, MemoryProbe, MonitorSettings};
pub use rate_limiter::{ConnectionRateLimiter, RateLimitCounter, RateLimitError};
pub use registry::{ConnectionRegistry, DeliveryReport};
pub use room_manager::{RoomManager, RoomStats};
pub use services::{Admission, RealtimeService};
