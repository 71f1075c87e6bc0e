//! 领域实体定义
//!
//! 包含身份、连接、房间以及 WebSocket 协议实体。

pub mod connection;
pub mod identity;
pub mod room;
pub mod websocket;

// 重新导出核心实体
pub use connection::{Connection, Namespace};
pub use identity::{Account, Identity, Role};
pub use room::{
    is_persistent_room, room_names, Room, RoomDescriptor, RoomKind, RoomScope, SyncDomain,
    PERSISTENT_ROOM_PREFIXES,
};
pub use websocket::{ClientCommand, ServerReply};
