//! 连接注册表
//!
//! 按连接ID、身份、门店、角色四个维度索引所有在线连接。
//! 发送时先在读锁内取出传输句柄快照，锁外逐个发送；发送失败的连接
//! 进入待移除队列，由下一次发布或连接巡检统一移除。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use domain::{
    BranchId, Connection, ConnectionId, RealtimeError, RealtimeEvent, Role, ServerReply,
    Timestamp, Transport, UserId,
};
use tracing::{debug, info, warn};

use crate::room_manager::RoomManager;

struct RegisteredConnection {
    connection: Connection,
    transport: Arc<dyn Transport>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, RegisteredConnection>,
    by_identity: HashMap<UserId, HashSet<ConnectionId>>,
    by_branch: HashMap<BranchId, HashSet<ConnectionId>>,
    by_role: HashMap<Role, HashSet<ConnectionId>>,
    /// 正在注销的连接，期间不再视为在线
    closing: HashSet<ConnectionId>,
}

fn unindex<K: std::hash::Hash + Eq>(
    index: &mut HashMap<K, HashSet<ConnectionId>>,
    key: &K,
    connection_id: &ConnectionId,
) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(connection_id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

impl RegistryState {
    fn insert(&mut self, connection: Connection, transport: Arc<dyn Transport>) {
        let id = connection.id;
        self.by_identity
            .entry(connection.identity.id.clone())
            .or_default()
            .insert(id);
        if let Some(branch_id) = &connection.branch_scope {
            self.by_branch.entry(branch_id.clone()).or_default().insert(id);
        }
        self.by_role
            .entry(connection.identity.role)
            .or_default()
            .insert(id);
        self.connections.insert(
            id,
            RegisteredConnection {
                connection,
                transport,
            },
        );
    }

    fn remove(&mut self, connection_id: &ConnectionId) -> Option<RegisteredConnection> {
        let entry = self.connections.remove(connection_id)?;
        let connection = &entry.connection;
        unindex(&mut self.by_identity, &connection.identity.id, connection_id);
        if let Some(branch_id) = &connection.branch_scope {
            unindex(&mut self.by_branch, branch_id, connection_id);
        }
        unindex(&mut self.by_role, &connection.identity.role, connection_id);
        Some(entry)
    }

    fn connections_in(&self, ids: Option<&HashSet<ConnectionId>>) -> Vec<Connection> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.connections.get(id))
                .map(|entry| entry.connection.clone())
                .collect()
        })
        .unwrap_or_default()
    }
}

/// 一次投递的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// 成功写入传输层
    pub delivered: usize,
    /// 作用域不符被丢弃
    pub denied: usize,
    /// 传输层发送失败
    pub failed: usize,
}

/// 连接注册表
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    pending_removal: Mutex<HashSet<ConnectionId>>,
    rooms: Arc<RoomManager>,
}

impl ConnectionRegistry {
    pub fn new(rooms: Arc<RoomManager>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            pending_removal: Mutex::new(HashSet::new()),
            rooms,
        }
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    /// 注册连接
    pub fn add(&self, connection: Connection, transport: Arc<dyn Transport>) {
        let connection_id = connection.id;
        let user_id = connection.identity.id.clone();
        let previous = {
            let mut state = self.write();
            let previous = state.remove(&connection_id);
            state.insert(connection, transport);
            previous
        };
        if previous.is_some() {
            warn!(connection_id = %connection_id, "connection id registered twice, replaced");
        }
        info!(
            connection_id = %connection_id,
            user_id = %user_id,
            "Connection registered"
        );
    }

    /// 注销连接
    ///
    /// 先标记为注销中，再清理房间成员关系和各级索引，最后关闭传输。
    /// 标记之后并发的加入房间操作会自行撤销。重复调用是空操作。
    pub fn remove(&self, connection_id: &ConnectionId) -> Option<Connection> {
        self.write().closing.insert(*connection_id);
        self.rooms.leave_all(connection_id);
        let entry = {
            let mut state = self.write();
            state.closing.remove(connection_id);
            state.remove(connection_id)
        };
        self.pending().remove(connection_id);

        let entry = entry?;
        entry.transport.close();
        info!(
            connection_id = %connection_id,
            user_id = %entry.connection.identity.id,
            "Connection unregistered"
        );
        Some(entry.connection)
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<Connection> {
        self.read()
            .connections
            .get(connection_id)
            .map(|entry| entry.connection.clone())
    }

    /// 连接已注册且不在注销过程中
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        let state = self.read();
        state.connections.contains_key(connection_id) && !state.closing.contains(connection_id)
    }

    /// 让已注册的连接加入房间，连接不存在或无权加入时返回 false
    pub fn join_room(&self, connection_id: &ConnectionId, room_id: &str) -> bool {
        match self.get(connection_id) {
            Some(connection) => self.rooms.join(&connection, room_id, self),
            None => false,
        }
    }

    /// 按身份自动加入房间，返回加入的房间列表
    pub fn auto_join(&self, connection: &Connection) -> Vec<String> {
        self.rooms.auto_join(connection, self)
    }

    /// 更新连接活跃时间，连接不存在时返回 false
    pub fn touch(&self, connection_id: &ConnectionId, now: Timestamp) -> bool {
        match self.write().connections.get_mut(connection_id) {
            Some(entry) => {
                entry.connection.touch(now);
                true
            }
            None => false,
        }
    }

    pub fn by_identity(&self, user_id: &UserId) -> Vec<Connection> {
        let state = self.read();
        state.connections_in(state.by_identity.get(user_id))
    }

    pub fn by_branch(&self, branch_id: &BranchId) -> Vec<Connection> {
        let state = self.read();
        state.connections_in(state.by_branch.get(branch_id))
    }

    pub fn ids_by_role(&self, role: Role) -> Vec<ConnectionId> {
        self.read()
            .by_role
            .get(&role)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn all_ids(&self) -> Vec<ConnectionId> {
        self.read().connections.keys().copied().collect()
    }

    /// 向单个连接发送事件，作用域不符或发送失败时返回 false
    pub fn send(&self, connection_id: &ConnectionId, event: &RealtimeEvent) -> bool {
        self.deliver(std::slice::from_ref(connection_id), event).delivered == 1
    }

    /// 向单个连接发送应答
    pub fn send_reply(&self, connection_id: &ConnectionId, reply: &ServerReply) -> bool {
        match serde_json::to_string(reply) {
            Ok(payload) => self.send_raw(connection_id, &payload),
            Err(e) => {
                warn!(connection_id = %connection_id, "failed to serialize reply: {}", e);
                false
            }
        }
    }

    /// 发送已序列化的帧
    pub fn send_raw(&self, connection_id: &ConnectionId, payload: &str) -> bool {
        let transport = self
            .read()
            .connections
            .get(connection_id)
            .map(|entry| Arc::clone(&entry.transport));

        match transport {
            Some(transport) => self.send_on(connection_id, transport.as_ref(), payload),
            None => {
                debug!(connection_id = %connection_id, "send to unknown connection");
                false
            }
        }
    }

    /// 向一组连接投递事件，逐个做作用域授权
    pub fn deliver(&self, connection_ids: &[ConnectionId], event: &RealtimeEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(event_id = %event.id, "failed to serialize event: {}", e);
                return report;
            }
        };

        // 读锁内只取快照
        let targets: Vec<(ConnectionId, bool, Arc<dyn Transport>)> = {
            let state = self.read();
            connection_ids
                .iter()
                .filter_map(|id| state.connections.get(id))
                .map(|entry| {
                    (
                        entry.connection.id,
                        event.is_visible_to(&entry.connection.identity),
                        Arc::clone(&entry.transport),
                    )
                })
                .collect()
        };

        for (connection_id, visible, transport) in targets {
            if !visible {
                report.denied += 1;
                if let Some(branch_id) = &event.branch_id {
                    let denial = RealtimeError::Authorization {
                        connection_id,
                        branch_id: branch_id.clone(),
                    };
                    debug!(event_id = %event.id, "delivery dropped: {}", denial);
                }
                continue;
            }

            if self.send_on(&connection_id, transport.as_ref(), &payload) {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    /// 向所有在线连接投递
    pub fn broadcast_all(&self, event: &RealtimeEvent) -> DeliveryReport {
        self.deliver(&self.all_ids(), event)
    }

    fn send_on(&self, connection_id: &ConnectionId, transport: &dyn Transport, payload: &str) -> bool {
        match transport.send(payload) {
            Ok(()) => true,
            Err(source) => {
                let error = RealtimeError::Transport {
                    connection_id: *connection_id,
                    source,
                };
                warn!("{}, scheduling removal", error);
                self.pending().insert(*connection_id);
                false
            }
        }
    }

    /// 强制驱逐身份的所有连接，返回移除数量；重复调用是空操作
    pub fn evict_identity(&self, user_id: &UserId) -> usize {
        let targets: Vec<ConnectionId> = self
            .read()
            .by_identity
            .get(user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let evicted = targets
            .iter()
            .filter(|id| self.remove(id).is_some())
            .count();
        if evicted > 0 {
            info!(user_id = %user_id, evicted, "identity evicted");
        }
        evicted
    }

    /// 移除传输已断开的连接以及待移除队列中的连接
    pub fn sweep_dead(&self) -> usize {
        let dead: Vec<ConnectionId> = self
            .read()
            .connections
            .values()
            .filter(|entry| !entry.transport.is_alive())
            .map(|entry| entry.connection.id)
            .collect();

        let removed = dead
            .iter()
            .filter(|id| self.remove(id).is_some())
            .count()
            + self.reap_pending();
        if removed > 0 {
            info!("Cleaned up {} dead connections", removed);
        }
        removed
    }

    /// 移除发送失败的连接
    pub fn reap_pending(&self) -> usize {
        let pending: Vec<ConnectionId> = self.pending().drain().collect();
        pending
            .iter()
            .filter(|id| self.remove(id).is_some())
            .count()
    }

    pub fn pending_removal(&self) -> usize {
        self.pending().len()
    }

    /// 关闭并移除所有连接（停机时使用）
    pub fn close_all(&self) -> usize {
        self.all_ids()
            .iter()
            .filter(|id| self.remove(id).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.read().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn identity_count(&self) -> usize {
        self.read().by_identity.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashSet<ConnectionId>> {
        self.pending_removal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::testing::RecordingTransport;
    use chrono::Utc;
    use domain::{
        EventPayload, Identity, LowStockAlert, MockTransport, Namespace, TransportError,
    };

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(RoomManager::new(Arc::new(SystemClock))))
    }

    fn connect(
        registry: &ConnectionRegistry,
        user: &str,
        role: Role,
        branch: Option<&str>,
    ) -> (Connection, Arc<RecordingTransport>) {
        let identity = Identity::new(user, user, role, branch.map(BranchId::from));
        let connection = Connection::new(identity, Namespace::General, Utc::now());
        let transport = Arc::new(RecordingTransport::new());
        registry.add(connection.clone(), transport.clone());
        registry.auto_join(&connection);
        (connection, transport)
    }

    fn low_stock(branch: &str) -> RealtimeEvent {
        RealtimeEvent::new(EventPayload::LowStockAlert(LowStockAlert {
            product_id: "p1".into(),
            product_name: "Milk".into(),
            current_stock: 1,
            threshold: 5,
        }))
        .with_branch(branch)
    }

    #[test]
    fn indexes_by_identity_branch_and_role() {
        let registry = registry();
        let (first, _) = connect(&registry, "u1", Role::Staff, Some("B1"));
        let (second, _) = connect(&registry, "u1", Role::Staff, Some("B1"));
        connect(&registry, "u2", Role::Admin, None);

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.identity_count(), 2);
        assert_eq!(registry.by_identity(&UserId::from("u1")).len(), 2);
        assert_eq!(registry.by_branch(&BranchId::from("B1")).len(), 2);
        assert_eq!(registry.ids_by_role(Role::Admin).len(), 1);

        registry.remove(&first.id);
        let remaining = registry.by_identity(&UserId::from("u1"));
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);
    }

    #[test]
    fn remove_clears_rooms_immediately_and_is_idempotent() {
        let registry = registry();
        let (staff, _) = connect(&registry, "s1", Role::Staff, Some("B1"));
        let rooms = registry.rooms().rooms_of(&staff.id);
        assert!(!rooms.is_empty());

        assert!(registry.remove(&staff.id).is_some());
        for room in rooms {
            assert!(!registry.rooms().member_ids(&room).contains(&staff.id), "{room}");
        }
        assert!(registry.by_branch(&BranchId::from("B1")).is_empty());
        assert!(registry.remove(&staff.id).is_none());
    }

    #[test]
    fn deliver_enforces_branch_scope() {
        let registry = registry();
        let (b1, b1_transport) = connect(&registry, "s1", Role::Staff, Some("B1"));
        let (b2, b2_transport) = connect(&registry, "s2", Role::Staff, Some("B2"));
        let (admin, admin_transport) = connect(&registry, "a1", Role::Admin, Some("B9"));

        let report = registry.deliver(&[b1.id, b2.id, admin.id], &low_stock("B1"));
        assert_eq!(
            report,
            DeliveryReport {
                delivered: 2,
                denied: 1,
                failed: 0
            }
        );
        assert_eq!(b1_transport.frames().len(), 1);
        assert!(b2_transport.frames().is_empty());
        assert_eq!(admin_transport.frames().len(), 1);
    }

    #[test]
    fn failed_send_schedules_removal_without_error() {
        let registry = registry();
        let identity = Identity::new("s1", "S", Role::Staff, Some(BranchId::from("B1")));
        let connection = Connection::new(identity, Namespace::Pos, Utc::now());

        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .returning(|_| Err(TransportError::Closed));
        transport.expect_is_alive().returning(|| false);
        transport.expect_close().times(1).return_const(());
        registry.add(connection.clone(), Arc::new(transport));

        assert!(!registry.send(&connection.id, &low_stock("B1")));
        assert_eq!(registry.pending_removal(), 1);
        assert!(registry.contains(&connection.id));

        assert_eq!(registry.reap_pending(), 1);
        assert!(!registry.contains(&connection.id));
        assert_eq!(registry.pending_removal(), 0);
    }

    #[test]
    fn backpressured_connection_is_closed_when_reaped() {
        let registry = registry();
        let (staff, transport) = connect(&registry, "s1", Role::Staff, Some("B1"));
        transport.congest();

        let report = registry.deliver(&[staff.id], &low_stock("B1"));
        assert_eq!(report.failed, 1);
        // 拥塞的传输仍然存活，只能靠待移除队列回收
        assert!(transport.is_alive());
        assert!(!transport.is_closed());

        assert_eq!(registry.reap_pending(), 1);
        assert!(transport.is_closed());
        assert!(!registry.contains(&staff.id));
        assert!(registry.rooms().rooms_of(&staff.id).is_empty());
    }

    #[test]
    fn join_after_removal_is_withdrawn() {
        let registry = registry();
        let (staff, _) = connect(&registry, "s1", Role::Staff, Some("B1"));
        let fetched = registry.get(&staff.id).unwrap();
        registry.remove(&staff.id);

        assert!(!registry.rooms().join(&fetched, "sync:products", &registry));
        assert!(!registry.join_room(&staff.id, "sync:products"));
        assert!(registry.rooms().member_ids("sync:products").is_empty());
        assert!(registry.rooms().rooms_of(&staff.id).is_empty());
        assert!(registry.auto_join(&fetched).is_empty());
        assert_eq!(registry.rooms().stats().memberships, 0);
    }

    #[test]
    fn sweep_removes_dead_transports() {
        let registry = registry();
        let (alive, _) = connect(&registry, "s1", Role::Staff, Some("B1"));
        let (dead, dead_transport) = connect(&registry, "s2", Role::Staff, Some("B1"));
        dead_transport.disconnect();

        assert_eq!(registry.sweep_dead(), 1);
        assert!(registry.contains(&alive.id));
        assert!(!registry.contains(&dead.id));
        assert!(registry.rooms().rooms_of(&dead.id).is_empty());
        assert!(dead_transport.is_closed());
    }

    #[test]
    fn eviction_is_idempotent() {
        let registry = registry();
        let (_, first) = connect(&registry, "u1", Role::Manager, Some("B1"));
        let (_, second) = connect(&registry, "u1", Role::Manager, Some("B1"));
        connect(&registry, "u2", Role::Manager, Some("B1"));

        assert_eq!(registry.evict_identity(&UserId::from("u1")), 2);
        assert!(first.is_closed());
        assert!(second.is_closed());
        assert!(registry.by_identity(&UserId::from("u1")).is_empty());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.rooms().member_ids("user:u1"), Vec::new());

        assert_eq!(registry.evict_identity(&UserId::from("u1")), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn broadcast_all_reaches_every_connection_once() {
        let registry = registry();
        let transports: Vec<_> = ["u1", "u2", "u3"]
            .into_iter()
            .map(|user| connect(&registry, user, Role::Staff, None).1)
            .collect();

        let event = RealtimeEvent::system_notification(domain::Severity::Info, "Hi", "all");
        let report = registry.broadcast_all(&event);
        assert_eq!(report.delivered, 3);
        for transport in transports {
            assert_eq!(transport.frames().len(), 1);
        }
    }

    #[test]
    fn send_reply_serializes_tagged_frame() {
        let registry = registry();
        let (staff, transport) = connect(&registry, "s1", Role::Staff, None);
        assert!(registry.send_reply(&staff.id, &ServerReply::error("X", "boom")));
        let frame: serde_json::Value = serde_json::from_str(&transport.frames()[0]).unwrap();
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["data"]["code"], "X");
    }
}
