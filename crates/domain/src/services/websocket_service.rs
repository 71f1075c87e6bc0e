//! 传输层接口
//!
//! 注册表和房间管理器只通过这个最小接口与具体的 WebSocket 实现交互，
//! 测试中可以用内存实现替换。

use crate::errors::TransportError;

/// 单个连接的传输句柄
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait Transport: Send + Sync {
    /// 非阻塞地将一帧放入发送队列
    fn send(&self, payload: &str) -> Result<(), TransportError>;

    /// 主动关闭连接
    fn close(&self);

    /// 对端是否仍然在线
    fn is_alive(&self) -> bool;
}
