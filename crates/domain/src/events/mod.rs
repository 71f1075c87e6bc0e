//! 领域事件定义
//!
//! 实时推送的事件分类，使用带标签的和类型表示。

pub mod realtime_event;

pub use realtime_event::*;
