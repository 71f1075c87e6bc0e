//! WebSocket协议实体
//!
//! 客户端命令与服务端应答，线上格式为 `{"type": ..., "data": {...}}`。

use serde::{Deserialize, Serialize};

use crate::entities::connection::Namespace;
use crate::events::EventType;
use crate::value_objects::{ConnectionId, Timestamp};

/// 客户端命令
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// 加入房间
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String },
    /// 离开房间
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: String },
    /// 心跳
    Ping {},
    /// 查询当前所在房间
    GetRooms {},
    /// 订阅事件类型（仅应答，不做过滤）
    #[serde(rename_all = "camelCase")]
    SubscribeEvents { event_types: Vec<EventType> },
}

/// 服务端应答
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerReply {
    /// 握手完成
    #[serde(rename_all = "camelCase")]
    Connected {
        connection_id: ConnectionId,
        namespace: Namespace,
        rooms: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    RoomJoined { room_id: String, success: bool },
    #[serde(rename_all = "camelCase")]
    RoomLeft { room_id: String, success: bool },
    Pong { timestamp: Timestamp },
    Rooms { rooms: Vec<String> },
    #[serde(rename_all = "camelCase")]
    Subscribed { event_types: Vec<EventType> },
    /// 错误消息
    Error { code: String, message: String },
}

impl ServerReply {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}
