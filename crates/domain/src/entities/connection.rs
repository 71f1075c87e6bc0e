//! 连接实体
//!
//! 由连接注册表独占持有：握手成功时创建，只更新活跃时间，断开或驱逐时销毁。

use serde::{Deserialize, Serialize};

use crate::entities::identity::Identity;
use crate::value_objects::{BranchId, ConnectionId, Timestamp};

/// 逻辑通道
///
/// 三个通道认证方式相同，通道只影响约定俗成的默认房间，不影响授权。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// 普通客户端
    General,
    /// 管理端
    Admin,
    /// 收银终端
    Pos,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::General => "general",
            Namespace::Admin => "admin",
            Namespace::Pos => "pos",
        }
    }
}

/// WebSocket连接信息
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    /// 连接ID
    pub id: ConnectionId,
    /// 连接所属身份
    pub identity: Identity,
    /// 门店作用域
    pub branch_scope: Option<BranchId>,
    /// 通道
    pub namespace: Namespace,
    /// 连接建立时间
    pub connected_at: Timestamp,
    /// 最后活跃时间
    pub last_activity_at: Timestamp,
}

impl Connection {
    pub fn new(identity: Identity, namespace: Namespace, now: Timestamp) -> Self {
        Self {
            id: ConnectionId::new(),
            branch_scope: identity.branch_id.clone(),
            identity,
            namespace,
            connected_at: now,
            last_activity_at: now,
        }
    }

    /// 更新活动时间
    pub fn touch(&mut self, now: Timestamp) {
        self.last_activity_at = now;
    }
}
