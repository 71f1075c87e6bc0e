//! 领域模型错误定义
//!
//! 实时推送子系统内所有可能的错误类型：握手认证、逐条投递授权、
//! 限流、事件格式以及传输层错误。

use thiserror::Error;

use crate::value_objects::{BranchId, ConnectionId};

/// 握手阶段的认证错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// 未提供凭证
    #[error("missing credential")]
    MissingCredential,

    /// 凭证格式错误或签名无效
    #[error("invalid credential: {reason}")]
    InvalidCredential { reason: String },

    /// 凭证已过期
    #[error("credential expired")]
    ExpiredCredential,

    /// 账号已停用
    #[error("account is inactive")]
    InactiveAccount,
}

impl AuthError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidCredential {
            reason: reason.into(),
        }
    }

    /// 机器可读的错误码，握手拒绝时返回给客户端
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "MISSING_CREDENTIAL",
            AuthError::InvalidCredential { .. } => "INVALID_CREDENTIAL",
            AuthError::ExpiredCredential => "EXPIRED_CREDENTIAL",
            AuthError::InactiveAccount => "INACTIVE_ACCOUNT",
        }
    }
}

/// 传输层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// 对端已断开
    #[error("transport closed")]
    Closed,

    /// 发送队列已满
    #[error("outbound queue full")]
    Backpressure,
}

/// 实时推送错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RealtimeError {
    /// 跨作用域投递，被静默丢弃
    #[error("connection {connection_id} may not receive events of branch {branch_id}")]
    Authorization {
        connection_id: ConnectionId,
        branch_id: BranchId,
    },

    /// 握手被限流
    #[error("rate limit exceeded: {current}/{max} attempts per window")]
    RateLimited { current: u32, max: u32 },

    /// 事件缺少必要的作用域字段或类型未知
    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },

    /// 发送失败
    #[error("transport error on {connection_id}: {source}")]
    Transport {
        connection_id: ConnectionId,
        #[source]
        source: TransportError,
    },

    /// 房间不存在且无法按命名规则创建
    #[error("room not found: {room_id}")]
    RoomNotFound { room_id: String },

    /// 发布队列已满
    #[error("publish queue full")]
    QueueFull,

    /// 发布队列已关闭
    #[error("publish queue closed")]
    QueueClosed,
}

impl RealtimeError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            reason: reason.into(),
        }
    }

    pub fn room_not_found(room_id: impl Into<String>) -> Self {
        Self::RoomNotFound {
            room_id: room_id.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            RealtimeError::Authorization { .. } => "FORBIDDEN",
            RealtimeError::RateLimited { .. } => "RATE_LIMITED",
            RealtimeError::MalformedEvent { .. } => "MALFORMED_EVENT",
            RealtimeError::Transport { .. } => "TRANSPORT_ERROR",
            RealtimeError::RoomNotFound { .. } => "ROOM_NOT_FOUND",
            RealtimeError::QueueFull => "QUEUE_FULL",
            RealtimeError::QueueClosed => "QUEUE_CLOSED",
        }
    }
}

/// 账号查询错误（外部关系存储）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type RealtimeResult<T> = Result<T, RealtimeError>;
