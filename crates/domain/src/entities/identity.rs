//! 身份实体
//!
//! 握手时由凭证解析得到，连接存续期间不可变。

use serde::{Deserialize, Serialize};

use crate::value_objects::{BranchId, UserId};

/// 用户角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// 管理员，可接收所有门店的事件
    Admin,
    /// 店长
    Manager,
    /// 店员
    Staff,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Manager, Role::Staff];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Staff => "staff",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "manager" => Some(Role::Manager),
            "staff" => Some(Role::Staff),
            _ => None,
        }
    }
}

/// 已认证的身份
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
    pub branch_id: Option<BranchId>,
}

impl Identity {
    pub fn new(
        id: impl Into<UserId>,
        display_name: impl Into<String>,
        role: Role,
        branch_id: Option<BranchId>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role,
            branch_id,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// 是否可以接收指定门店的事件：同门店或管理员
    pub fn can_see_branch(&self, branch_id: &BranchId) -> bool {
        self.is_admin() || self.branch_id.as_ref() == Some(branch_id)
    }
}

/// 账号记录，由外部关系存储提供
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Account {
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            branch_id: self.branch_id.clone(),
        }
    }
}
