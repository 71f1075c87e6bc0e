//! 房间实体与房间命名
//!
//! 房间ID是作用域的纯函数，加入与广播定位都只通过 [`room_names`] 生成ID，
//! 同一作用域永远得到同一个房间。

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entities::identity::{Identity, Role};
use crate::value_objects::{BranchId, ConnectionId, Timestamp, UserId};

/// 永不因为空闲而回收的房间前缀
pub const PERSISTENT_ROOM_PREFIXES: [&str; 2] = ["system:", "role:"];

/// 房间类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Branch,
    Role,
    User,
    Notification,
    System,
    Sync,
}

/// 可同步的业务域
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncDomain {
    Inventory,
    Products,
    Transactions,
    Categories,
    Users,
    Branches,
    Dashboard,
}

impl SyncDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDomain::Inventory => "inventory",
            SyncDomain::Products => "products",
            SyncDomain::Transactions => "transactions",
            SyncDomain::Categories => "categories",
            SyncDomain::Users => "users",
            SyncDomain::Branches => "branches",
            SyncDomain::Dashboard => "dashboard",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inventory" => Some(SyncDomain::Inventory),
            "products" => Some(SyncDomain::Products),
            "transactions" => Some(SyncDomain::Transactions),
            "categories" => Some(SyncDomain::Categories),
            "users" => Some(SyncDomain::Users),
            "branches" => Some(SyncDomain::Branches),
            "dashboard" => Some(SyncDomain::Dashboard),
            _ => None,
        }
    }
}

impl fmt::Display for SyncDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 房间命名函数
pub mod room_names {
    use super::*;

    pub fn branch(branch_id: &BranchId) -> String {
        format!("branch:{}", branch_id)
    }

    pub fn branch_admins(branch_id: &BranchId) -> String {
        format!("branch:{}:admins", branch_id)
    }

    pub fn user(user_id: &UserId) -> String {
        format!("user:{}", user_id)
    }

    pub fn user_notifications(user_id: &UserId) -> String {
        format!("notifications:user:{}", user_id)
    }

    pub fn role(role: Role) -> String {
        format!("role:{}", role.as_str())
    }

    pub fn role_admins() -> String {
        role(Role::Admin)
    }

    pub fn system_notifications() -> String {
        "system:notifications".to_string()
    }

    pub fn sync(domain: SyncDomain, branch_id: Option<&BranchId>) -> String {
        match branch_id {
            Some(branch_id) => format!("sync:{}:{}", domain, branch_id),
            None => format!("sync:{}", domain),
        }
    }
}

/// 房间是否属于持久房间
pub fn is_persistent_room(room_id: &str) -> bool {
    PERSISTENT_ROOM_PREFIXES
        .iter()
        .any(|prefix| room_id.starts_with(prefix))
}

/// 房间作用域元数据
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomScope {
    pub branch_id: Option<BranchId>,
    pub user_id: Option<UserId>,
    pub role: Option<Role>,
}

/// 从房间ID反解出的类型与作用域
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomDescriptor {
    pub kind: RoomKind,
    pub scope: RoomScope,
}

impl RoomDescriptor {
    /// 按已知命名规则解析房间ID，未知格式返回 `None`
    pub fn parse(room_id: &str) -> Option<Self> {
        let segment = |value: &str| -> Option<String> {
            (!value.is_empty() && !value.contains(':')).then(|| value.to_string())
        };

        if room_id == room_names::system_notifications() {
            return Some(Self {
                kind: RoomKind::System,
                scope: RoomScope::default(),
            });
        }

        if let Some(rest) = room_id.strip_prefix("branch:") {
            let (branch, admins_only) = match rest.strip_suffix(":admins") {
                Some(branch) => (branch, true),
                None => (rest, false),
            };
            return Some(Self {
                kind: RoomKind::Branch,
                scope: RoomScope {
                    branch_id: Some(BranchId::new(segment(branch)?)),
                    user_id: None,
                    role: admins_only.then_some(Role::Admin),
                },
            });
        }

        if let Some(user) = room_id.strip_prefix("user:") {
            return Some(Self {
                kind: RoomKind::User,
                scope: RoomScope {
                    user_id: Some(UserId::new(segment(user)?)),
                    ..RoomScope::default()
                },
            });
        }

        if let Some(user) = room_id.strip_prefix("notifications:user:") {
            return Some(Self {
                kind: RoomKind::Notification,
                scope: RoomScope {
                    user_id: Some(UserId::new(segment(user)?)),
                    ..RoomScope::default()
                },
            });
        }

        if let Some(role) = room_id.strip_prefix("role:") {
            return Some(Self {
                kind: RoomKind::Role,
                scope: RoomScope {
                    role: Some(Role::parse(role)?),
                    ..RoomScope::default()
                },
            });
        }

        if let Some(rest) = room_id.strip_prefix("sync:") {
            let (domain, branch) = match rest.split_once(':') {
                Some((domain, branch)) => (domain, Some(BranchId::new(segment(branch)?))),
                None => (rest, None),
            };
            SyncDomain::parse(domain)?;
            return Some(Self {
                kind: RoomKind::Sync,
                scope: RoomScope {
                    branch_id: branch,
                    ..RoomScope::default()
                },
            });
        }

        None
    }

    /// 身份是否可以主动加入该房间
    pub fn permits(&self, identity: &Identity) -> bool {
        match self.kind {
            RoomKind::User | RoomKind::Notification => {
                identity.is_admin() || self.scope.user_id.as_ref() == Some(&identity.id)
            }
            RoomKind::Branch => {
                let branch_ok = self
                    .scope
                    .branch_id
                    .as_ref()
                    .map_or(true, |branch| identity.can_see_branch(branch));
                let role_ok = self.scope.role.map_or(true, |role| role == identity.role);
                branch_ok && role_ok
            }
            RoomKind::Role => self.scope.role != Some(Role::Admin) || identity.is_admin(),
            RoomKind::Sync => self
                .scope
                .branch_id
                .as_ref()
                .map_or(true, |branch| identity.can_see_branch(branch)),
            RoomKind::System => true,
        }
    }
}

/// 房间
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: String,
    pub kind: RoomKind,
    pub scope: RoomScope,
    pub members: HashSet<ConnectionId>,
    pub created_at: Timestamp,
    pub last_activity_at: Timestamp,
}

impl Room {
    pub fn new(id: impl Into<String>, kind: RoomKind, scope: RoomScope, now: Timestamp) -> Self {
        Self {
            id: id.into(),
            kind,
            scope,
            members: HashSet::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn is_persistent(&self) -> bool {
        is_persistent_room(&self.id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// 添加成员，返回是否为新成员
    pub fn add_member(&mut self, connection_id: ConnectionId, now: Timestamp) -> bool {
        self.last_activity_at = now;
        self.members.insert(connection_id)
    }

    /// 移除成员，返回成员是否存在
    pub fn remove_member(&mut self, connection_id: &ConnectionId, now: Timestamp) -> bool {
        self.last_activity_at = now;
        self.members.remove(connection_id)
    }

    /// 空、非持久且空闲超过 `max_idle_secs` 的房间可以回收
    pub fn is_collectable(&self, now: Timestamp, max_idle_secs: i64) -> bool {
        self.is_empty()
            && !self.is_persistent()
            && now.signed_duration_since(self.last_activity_at).num_seconds() >= max_idle_secs
    }
}
