//! 房间管理
//!
//! 维护房间及其成员集合。成员集合只能通过这里暴露的操作修改；
//! 需要连接信息的操作通过参数传入 [`ConnectionRegistry`]，两把锁从不同时持有。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use domain::{
    room_names, Connection, ConnectionId, Namespace, RealtimeEvent, Role, Room, RoomDescriptor,
    RoomKind, RoomScope, SyncDomain,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::registry::ConnectionRegistry;

#[derive(Default)]
struct RoomTable {
    rooms: HashMap<String, Room>,
    /// 连接到所在房间的反向索引
    memberships: HashMap<ConnectionId, HashSet<String>>,
}

impl RoomTable {
    fn insert_room(&mut self, room: Room) -> bool {
        if self.rooms.contains_key(&room.id) {
            return false;
        }
        self.rooms.insert(room.id.clone(), room);
        true
    }

    fn detach(&mut self, connection_id: &ConnectionId, room_id: &str, now: domain::Timestamp) -> bool {
        let removed = match self.rooms.get_mut(room_id) {
            Some(room) => room.remove_member(connection_id, now),
            None => false,
        };

        if let Some(rooms) = self.memberships.get_mut(connection_id) {
            rooms.remove(room_id);
            if rooms.is_empty() {
                self.memberships.remove(connection_id);
            }
        }

        // 空的非持久房间立即删除
        let collectable = self
            .rooms
            .get(room_id)
            .is_some_and(|room| room.is_empty() && !room.is_persistent());
        if collectable {
            self.rooms.remove(room_id);
            debug!(room_id = %room_id, "empty room deleted");
        }

        removed
    }
}

/// 房间统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub rooms: usize,
    pub persistent_rooms: usize,
    pub memberships: usize,
}

/// 房间管理器
pub struct RoomManager {
    table: RwLock<RoomTable>,
    clock: Arc<dyn Clock>,
}

impl RoomManager {
    /// 创建房间管理器，并预先创建全部持久房间
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let manager = Self {
            table: RwLock::new(RoomTable::default()),
            clock,
        };

        manager.create_room(
            room_names::system_notifications(),
            RoomKind::System,
            RoomScope::default(),
        );
        for role in Role::ALL {
            manager.create_room(
                room_names::role(role),
                RoomKind::Role,
                RoomScope {
                    role: Some(role),
                    ..RoomScope::default()
                },
            );
        }
        manager
    }

    /// 创建房间，已存在时返回 false
    pub fn create_room(&self, room_id: impl Into<String>, kind: RoomKind, scope: RoomScope) -> bool {
        let room = Room::new(room_id, kind, scope, self.clock.now());
        let room_id = room.id.clone();
        let created = self.write().insert_room(room);
        if created {
            debug!(room_id = %room_id, "room created");
        }
        created
    }

    /// 加入房间
    ///
    /// 房间不存在时按命名规则惰性创建；未知命名或身份无权加入时返回 false。
    /// 写入成员关系后再确认连接仍在注册表中，已注销的连接会撤销本次加入。
    pub fn join(
        &self,
        connection: &Connection,
        room_id: &str,
        registry: &ConnectionRegistry,
    ) -> bool {
        if !self.attach(connection, room_id) {
            return false;
        }
        if registry.contains(&connection.id) {
            return true;
        }
        self.leave(&connection.id, room_id);
        debug!(
            connection_id = %connection.id,
            room_id = %room_id,
            "join withdrawn, connection already unregistered"
        );
        false
    }

    fn attach(&self, connection: &Connection, room_id: &str) -> bool {
        let descriptor = RoomDescriptor::parse(room_id);
        let now = self.clock.now();
        let mut table = self.write();

        if let Some(descriptor) = &descriptor {
            if !descriptor.permits(&connection.identity) {
                warn!(
                    connection_id = %connection.id,
                    user_id = %connection.identity.id,
                    room_id = %room_id,
                    "join denied by room scope"
                );
                return false;
            }
        }

        if !table.rooms.contains_key(room_id) {
            let Some(descriptor) = descriptor else {
                warn!(
                    connection_id = %connection.id,
                    room_id = %room_id,
                    "join failed: unknown room"
                );
                return false;
            };
            table.insert_room(Room::new(room_id, descriptor.kind, descriptor.scope, now));
        }

        if let Some(room) = table.rooms.get_mut(room_id) {
            room.add_member(connection.id, now);
        }
        table
            .memberships
            .entry(connection.id)
            .or_default()
            .insert(room_id.to_string());
        true
    }

    /// 离开房间，返回连接原本是否在房间内
    pub fn leave(&self, connection_id: &ConnectionId, room_id: &str) -> bool {
        let now = self.clock.now();
        self.write().detach(connection_id, room_id, now)
    }

    /// 离开所有房间，返回离开的房间
    pub fn leave_all(&self, connection_id: &ConnectionId) -> Vec<String> {
        let now = self.clock.now();
        let mut table = self.write();
        let rooms: Vec<String> = table
            .memberships
            .get(connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default();

        for room_id in &rooms {
            table.detach(connection_id, room_id, now);
        }
        rooms
    }

    /// 房间成员ID快照
    pub fn member_ids(&self, room_id: &str) -> Vec<ConnectionId> {
        self.read()
            .rooms
            .get(room_id)
            .map(|room| room.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// 房间成员
    pub fn members_of(&self, room_id: &str, registry: &ConnectionRegistry) -> Vec<Connection> {
        self.member_ids(room_id)
            .iter()
            .filter_map(|id| registry.get(id))
            .collect()
    }

    /// 向房间广播，返回成功投递数
    pub fn broadcast(
        &self,
        room_id: &str,
        event: &RealtimeEvent,
        registry: &ConnectionRegistry,
    ) -> usize {
        let members = self.member_ids(room_id);
        if members.is_empty() {
            debug!(room_id = %room_id, event_id = %event.id, "broadcast to empty room");
            return 0;
        }
        registry.deliver(&members, event).delivered
    }

    /// 连接当前所在的房间（按名称排序）
    pub fn rooms_of(&self, connection_id: &ConnectionId) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .read()
            .memberships
            .get(connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn room(&self, room_id: &str) -> Option<Room> {
        self.read().rooms.get(room_id).cloned()
    }

    pub fn exists(&self, room_id: &str) -> bool {
        self.read().rooms.contains_key(room_id)
    }

    /// 回收空闲超过 `max_idle_secs` 的空非持久房间
    pub fn sweep_idle(&self, max_idle_secs: i64) -> usize {
        let now = self.clock.now();
        let mut table = self.write();
        let before = table.rooms.len();
        table
            .rooms
            .retain(|_, room| !room.is_collectable(now, max_idle_secs));
        let removed = before - table.rooms.len();
        if removed > 0 {
            info!("Cleaned up {} idle rooms", removed);
        }
        removed
    }

    /// 清理不再属于任何注册连接的成员关系
    pub fn prune_orphans(&self, is_live: impl Fn(&ConnectionId) -> bool) -> usize {
        let members: Vec<ConnectionId> = self.read().memberships.keys().copied().collect();
        let orphans: Vec<ConnectionId> = members.into_iter().filter(|id| !is_live(id)).collect();

        for id in &orphans {
            warn!(connection_id = %id, "pruning memberships of unregistered connection");
            self.leave_all(id);
        }
        orphans.len()
    }

    pub fn stats(&self) -> RoomStats {
        let table = self.read();
        RoomStats {
            rooms: table.rooms.len(),
            persistent_rooms: table.rooms.values().filter(|room| room.is_persistent()).count(),
            memberships: table.rooms.values().map(Room::member_count).sum(),
        }
    }

    /// 握手成功后自动加入的房间
    pub fn auto_join_rooms(connection: &Connection) -> Vec<String> {
        let identity = &connection.identity;
        let mut rooms = Vec::new();

        if let Some(branch_id) = &connection.branch_scope {
            rooms.push(room_names::branch(branch_id));
        }
        rooms.push(room_names::user(&identity.id));
        rooms.push(room_names::user_notifications(&identity.id));
        rooms.extend(Role::ALL.into_iter().map(room_names::role));
        rooms.push(room_names::system_notifications());

        if let Some(branch_id) = &connection.branch_scope {
            if identity.is_admin() {
                rooms.push(room_names::branch_admins(branch_id));
            }
            if connection.namespace == Namespace::Pos {
                rooms.push(room_names::sync(SyncDomain::Inventory, Some(branch_id)));
                rooms.push(room_names::sync(SyncDomain::Transactions, Some(branch_id)));
            }
        }
        rooms
    }

    /// 执行自动加入，返回实际加入的房间
    ///
    /// 角色房间对所有连接开放，用于跨角色的系统广播，不受加入授权限制。
    /// 与 [`join`](Self::join) 相同，已注销的连接不会留下任何成员关系。
    pub fn auto_join(
        &self,
        connection: &Connection,
        registry: &ConnectionRegistry,
    ) -> Vec<String> {
        let rooms = self.attach_all(connection);
        if registry.contains(&connection.id) {
            return rooms;
        }
        self.leave_all(&connection.id);
        debug!(connection_id = %connection.id, "auto-join withdrawn, connection already unregistered");
        Vec::new()
    }

    fn attach_all(&self, connection: &Connection) -> Vec<String> {
        let now = self.clock.now();
        let rooms = Self::auto_join_rooms(connection);
        let mut table = self.write();

        for room_id in &rooms {
            if !table.rooms.contains_key(room_id) {
                let (kind, scope) = RoomDescriptor::parse(room_id)
                    .map(|descriptor| (descriptor.kind, descriptor.scope))
                    .unwrap_or((RoomKind::System, RoomScope::default()));
                table.insert_room(Room::new(room_id.as_str(), kind, scope, now));
            }
            if let Some(room) = table.rooms.get_mut(room_id) {
                room.add_member(connection.id, now);
            }
            table
                .memberships
                .entry(connection.id)
                .or_default()
                .insert(room_id.clone());
        }

        debug!(
            connection_id = %connection.id,
            rooms = rooms.len(),
            "auto-joined rooms"
        );
        rooms
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RoomTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RoomTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}
