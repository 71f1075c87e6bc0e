//! 事件广播
//!
//! 外部协作方通过 [`EventPublisher`] 把事件放入有界队列，
//! 单个消费者按发布顺序逐条计算目标并扇出。

use std::collections::HashSet;
use std::sync::Arc;

use domain::{ConnectionId, RealtimeError, RealtimeEvent, Role};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{ConnectionRegistry, DeliveryReport};

/// 一次发布的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub event_id: String,
    /// 去重后的目标房间，回退为全量广播时为空
    pub target_rooms: Vec<String>,
    pub broadcast_all: bool,
    pub delivered: usize,
    pub denied: usize,
    pub failed: usize,
}

impl PublishOutcome {
    fn new(event: &RealtimeEvent, target_rooms: Vec<String>, report: DeliveryReport) -> Self {
        Self {
            event_id: event.id.clone(),
            broadcast_all: target_rooms.is_empty(),
            target_rooms,
            delivered: report.delivered,
            denied: report.denied,
            failed: report.failed,
        }
    }
}

/// 事件广播器
pub struct EventBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl EventBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// 发布事件
    ///
    /// 格式错误的事件在这里整体丢弃，不会部分投递。
    pub fn publish(&self, event: &RealtimeEvent) -> Result<PublishOutcome, RealtimeError> {
        if let Err(e) = event.validate() {
            warn!(event_id = %event.id, event_type = %event.event_type(), "dropping event: {}", e);
            return Err(e);
        }

        let targets = event.targets();
        let report = if targets.is_broadcast_all() {
            debug!(
                event_id = %event.id,
                event_type = %event.event_type(),
                "event has no scope, broadcasting to all connections"
            );
            self.registry.broadcast_all(event)
        } else {
            let recipients = self.recipients(&targets.rooms, targets.include_admins);
            self.registry.deliver(&recipients, event)
        };

        // 清理本次发送失败的连接
        let reaped = self.registry.reap_pending();
        if reaped > 0 {
            debug!(event_id = %event.id, reaped, "removed connections after failed sends");
        }

        let outcome = PublishOutcome::new(event, targets.rooms, report);
        debug!(
            event_id = %outcome.event_id,
            rooms = outcome.target_rooms.len(),
            delivered = outcome.delivered,
            denied = outcome.denied,
            failed = outcome.failed,
            "event published"
        );
        Ok(outcome)
    }

    /// 目标房间成员与管理员连接的并集，每个连接只出现一次
    fn recipients(&self, rooms: &[String], include_admins: bool) -> Vec<ConnectionId> {
        let mut seen = HashSet::new();
        let mut recipients = Vec::new();
        let room_members = rooms
            .iter()
            .flat_map(|room_id| self.registry.rooms().member_ids(room_id));
        let admins = include_admins
            .then(|| self.registry.ids_by_role(Role::Admin))
            .unwrap_or_default();

        for id in room_members.chain(admins) {
            if seen.insert(id) {
                recipients.push(id);
            }
        }
        recipients
    }

    /// 消费发布队列直到队列关闭或收到停机信号
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<RealtimeEvent>, shutdown: CancellationToken) {
        info!("event broadcaster started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = events.recv() => match next {
                    Some(event) => {
                        // 错误已在 publish 内记录
                        let _ = self.publish(&event);
                    }
                    None => break,
                },
            }
        }
        info!("event broadcaster stopped");
    }
}

/// 发布队列的生产端
#[derive(Clone)]
pub struct EventPublisher {
    sender: mpsc::Sender<RealtimeEvent>,
}

/// 创建有界发布队列
pub fn publish_queue(capacity: usize) -> (EventPublisher, mpsc::Receiver<RealtimeEvent>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (EventPublisher { sender }, receiver)
}

impl EventPublisher {
    /// 校验后入队，队列满时等待
    pub async fn publish(&self, event: RealtimeEvent) -> Result<String, RealtimeError> {
        event.validate()?;
        let event_id = event.id.clone();
        self.sender
            .send(event)
            .await
            .map_err(|_| RealtimeError::QueueClosed)?;
        Ok(event_id)
    }

    /// 校验后入队，队列满时立即失败
    pub fn try_publish(&self, event: RealtimeEvent) -> Result<String, RealtimeError> {
        event.validate()?;
        let event_id = event.id.clone();
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RealtimeError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => RealtimeError::QueueClosed,
        })?;
        Ok(event_id)
    }
}
