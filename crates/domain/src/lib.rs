//! 实时推送子系统核心领域模型
//!
//! 包含身份、连接、房间、事件分类等核心实体，以及房间命名和投递授权规则。

pub mod entities;
pub mod errors;
pub mod events;
pub mod repositories;
pub mod services;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use repositories::*;
pub use services::*;
pub use value_objects::*;
