//! 实时推送事件
//!
//! 事件由外部协作方在业务变更完成时创建，创建后不可变，本子系统不做持久化。
//! 线上格式固定为 `{id, type, timestamp, branchId, userId?, data}`。

use std::collections::BTreeSet;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::identity::Identity;
use crate::entities::room::{room_names, SyncDomain};
use crate::errors::RealtimeError;
use crate::value_objects::{BranchId, Timestamp, UserId};

/// 事件类型（封闭枚举）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    InventoryUpdated,
    ProductUpdated,
    TransactionCreated,
    TransactionStatusChanged,
    LowStockAlert,
    SystemNotification,
    UserUpdated,
    BranchUpdated,
    CategoryUpdated,
    SyncStatus,
    DashboardRefresh,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::InventoryUpdated => "inventory-updated",
            EventType::ProductUpdated => "product-updated",
            EventType::TransactionCreated => "transaction-created",
            EventType::TransactionStatusChanged => "transaction-status-changed",
            EventType::LowStockAlert => "low-stock-alert",
            EventType::SystemNotification => "system-notification",
            EventType::UserUpdated => "user-updated",
            EventType::BranchUpdated => "branch-updated",
            EventType::CategoryUpdated => "category-updated",
            EventType::SyncStatus => "sync-status",
            EventType::DashboardRefresh => "dashboard-refresh",
        }
    }

    /// 需要同时推送给门店管理员房间的类型
    pub fn notifies_branch_admins(&self) -> bool {
        matches!(
            self,
            EventType::TransactionCreated | EventType::InventoryUpdated | EventType::LowStockAlert
        )
    }

    /// 必须带门店作用域的类型
    pub fn requires_branch(&self) -> bool {
        matches!(
            self,
            EventType::InventoryUpdated
                | EventType::TransactionCreated
                | EventType::TransactionStatusChanged
                | EventType::LowStockAlert
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 变更动作
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

/// 通知级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// 同步进度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    Started,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventoryUpdated {
    pub product_id: String,
    #[serde(default)]
    pub product_name: Option<String>,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdated {
    pub product_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub action: ChangeAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCreated {
    pub transaction_id: String,
    pub transaction_type: String,
    pub total_amount: f64,
    pub item_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusChanged {
    pub transaction_id: String,
    pub previous_status: String,
    pub new_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LowStockAlert {
    pub product_id: String,
    pub product_name: String,
    pub current_stock: i64,
    pub threshold: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemNotification {
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdated {
    pub action: ChangeAction,
    #[serde(default)]
    pub changed_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BranchUpdated {
    pub action: ChangeAction,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUpdated {
    pub category_id: String,
    pub action: ChangeAction,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub domain: SyncDomain,
    pub status: SyncState,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardRefresh {
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// 事件载荷：每种类型只携带自己需要的字段
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum EventPayload {
    InventoryUpdated(InventoryUpdated),
    ProductUpdated(ProductUpdated),
    TransactionCreated(TransactionCreated),
    TransactionStatusChanged(TransactionStatusChanged),
    LowStockAlert(LowStockAlert),
    SystemNotification(SystemNotification),
    UserUpdated(UserUpdated),
    BranchUpdated(BranchUpdated),
    CategoryUpdated(CategoryUpdated),
    SyncStatus(SyncStatus),
    DashboardRefresh(DashboardRefresh),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::InventoryUpdated(_) => EventType::InventoryUpdated,
            EventPayload::ProductUpdated(_) => EventType::ProductUpdated,
            EventPayload::TransactionCreated(_) => EventType::TransactionCreated,
            EventPayload::TransactionStatusChanged(_) => EventType::TransactionStatusChanged,
            EventPayload::LowStockAlert(_) => EventType::LowStockAlert,
            EventPayload::SystemNotification(_) => EventType::SystemNotification,
            EventPayload::UserUpdated(_) => EventType::UserUpdated,
            EventPayload::BranchUpdated(_) => EventType::BranchUpdated,
            EventPayload::CategoryUpdated(_) => EventType::CategoryUpdated,
            EventPayload::SyncStatus(_) => EventType::SyncStatus,
            EventPayload::DashboardRefresh(_) => EventType::DashboardRefresh,
        }
    }
}

/// 推送给客户端的事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeEvent {
    pub id: String,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<BranchId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// 事件的投递目标
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventTargets {
    /// 去重后的目标房间
    pub rooms: Vec<String>,
    /// 是否同时直接投递给所有管理员连接；仅限不指定用户的门店事件
    pub include_admins: bool,
}

impl EventTargets {
    /// 没有任何房间时回退为全量广播
    pub fn is_broadcast_all(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl RealtimeEvent {
    pub fn new(payload: EventPayload) -> Self {
        let event_type = payload.event_type();
        Self {
            id: format!("{}_{}", event_type, Uuid::new_v4().simple()),
            timestamp: Utc::now(),
            branch_id: None,
            user_id: None,
            payload,
        }
    }

    pub fn with_branch(mut self, branch_id: impl Into<BranchId>) -> Self {
        self.branch_id = Some(branch_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// 系统级通知
    pub fn system_notification(
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(EventPayload::SystemNotification(SystemNotification {
            severity,
            title: title.into(),
            message: message.into(),
        }))
    }

    /// 结构校验：必要的作用域字段必须存在且非空
    pub fn validate(&self) -> Result<(), RealtimeError> {
        if self.id.trim().is_empty() {
            return Err(RealtimeError::malformed("event id is empty"));
        }
        if self.branch_id.as_ref().is_some_and(|b| b.as_str().is_empty()) {
            return Err(RealtimeError::malformed("branchId is empty"));
        }
        if self.user_id.as_ref().is_some_and(|u| u.as_str().is_empty()) {
            return Err(RealtimeError::malformed("userId is empty"));
        }

        let event_type = self.event_type();
        if event_type.requires_branch() && self.branch_id.is_none() {
            return Err(RealtimeError::malformed(format!(
                "{} requires branchId",
                event_type
            )));
        }
        if event_type == EventType::UserUpdated && self.user_id.is_none() {
            return Err(RealtimeError::malformed("user-updated requires userId"));
        }
        Ok(())
    }

    /// 计算目标房间集合（并集、去重）
    pub fn targets(&self) -> EventTargets {
        let event_type = self.event_type();
        let mut rooms = BTreeSet::new();

        if event_type == EventType::SystemNotification {
            rooms.insert(room_names::system_notifications());
        }

        if let Some(branch_id) = &self.branch_id {
            rooms.insert(room_names::branch(branch_id));
            if event_type.notifies_branch_admins() {
                rooms.insert(room_names::branch_admins(branch_id));
            }
        }

        if let Some(user_id) = &self.user_id {
            rooms.insert(room_names::user(user_id));
            rooms.insert(room_names::user_notifications(user_id));
        }

        EventTargets {
            rooms: rooms.into_iter().collect(),
            include_admins: self.branch_id.is_some() && self.user_id.is_none(),
        }
    }

    /// 逐条投递授权：门店事件只投递给同门店连接或管理员
    pub fn is_visible_to(&self, identity: &Identity) -> bool {
        match &self.branch_id {
            Some(branch_id) => identity.can_see_branch(branch_id),
            None => true,
        }
    }
}
