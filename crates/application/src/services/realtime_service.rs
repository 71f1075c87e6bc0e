use std::sync::Arc;

use domain::{
    AuthError, ClientCommand, Connection, ConnectionId, Identity, Namespace, ServerReply,
    Transport, UserId,
};
use tracing::{debug, info, warn};

use crate::auth::IdentityResolver;
use crate::error::HandshakeError;
use crate::hub::RealtimeHub;

/// 握手成功后的连接
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub connection: Connection,
    /// 自动加入的房间
    pub rooms: Vec<String>,
}

/// 连接生命周期服务：握手、客户端命令、断开
pub struct RealtimeService {
    resolver: Arc<dyn IdentityResolver>,
    hub: Arc<RealtimeHub>,
}

impl RealtimeService {
    pub fn new(resolver: Arc<dyn IdentityResolver>, hub: Arc<RealtimeHub>) -> Self {
        Self { resolver, hub }
    }

    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.hub
    }

    /// 握手认证：解析凭证并检查限流
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, HandshakeError> {
        let credential = credential
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::MissingCredential)?;

        let identity = match self.resolver.resolve(credential).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(code = e.code(), "handshake refused: {}", e);
                return Err(e.into());
            }
        };

        self.hub.limiter().check(&identity.id)?;
        Ok(identity)
    }

    /// 注册已认证的连接，自动加入房间并发送 `connected`
    pub fn register(
        &self,
        identity: Identity,
        namespace: Namespace,
        transport: Arc<dyn Transport>,
    ) -> Admission {
        let connection = Connection::new(identity, namespace, self.hub.clock().now());
        self.hub.registry().add(connection.clone(), transport);
        let rooms = self.hub.registry().auto_join(&connection);

        self.hub.registry().send_reply(
            &connection.id,
            &ServerReply::Connected {
                connection_id: connection.id,
                namespace,
                rooms: rooms.clone(),
            },
        );
        info!(
            connection_id = %connection.id,
            user_id = %connection.identity.id,
            role = connection.identity.role.as_str(),
            namespace = namespace.as_str(),
            "client connected"
        );

        Admission { connection, rooms }
    }

    /// 处理一帧客户端文本，返回已发送的应答
    pub fn handle_frame(&self, connection_id: &ConnectionId, text: &str) -> Option<ServerReply> {
        let reply = match serde_json::from_str::<ClientCommand>(text) {
            Ok(command) => self.handle_command(connection_id, command)?,
            Err(e) => {
                debug!(connection_id = %connection_id, "unparseable client frame: {}", e);
                if !self.hub.registry().touch(connection_id, self.hub.clock().now()) {
                    return None;
                }
                ServerReply::error("INVALID_COMMAND", e.to_string())
            }
        };
        self.hub.registry().send_reply(connection_id, &reply);
        Some(reply)
    }

    /// 处理客户端命令；连接已不存在时返回 `None`
    pub fn handle_command(
        &self,
        connection_id: &ConnectionId,
        command: ClientCommand,
    ) -> Option<ServerReply> {
        let now = self.hub.clock().now();
        if !self.hub.registry().touch(connection_id, now) {
            return None;
        }

        let reply = match command {
            ClientCommand::JoinRoom { room_id } => {
                let connection = self.hub.registry().get(connection_id)?;
                let success = self
                    .hub
                    .rooms()
                    .join(&connection, &room_id, self.hub.registry());
                ServerReply::RoomJoined { room_id, success }
            }
            ClientCommand::LeaveRoom { room_id } => {
                let success = self.hub.rooms().leave(connection_id, &room_id);
                ServerReply::RoomLeft { room_id, success }
            }
            ClientCommand::Ping {} => ServerReply::Pong { timestamp: now },
            ClientCommand::GetRooms {} => ServerReply::Rooms {
                rooms: self.hub.rooms().rooms_of(connection_id),
            },
            ClientCommand::SubscribeEvents { event_types } => {
                debug!(
                    connection_id = %connection_id,
                    count = event_types.len(),
                    "event subscription acknowledged"
                );
                ServerReply::Subscribed { event_types }
            }
        };
        Some(reply)
    }

    /// 连接断开
    pub fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        let removed = self.hub.registry().remove(connection_id);
        if let Some(connection) = &removed {
            info!(
                connection_id = %connection_id,
                user_id = %connection.identity.id,
                "client disconnected"
            );
        }
        removed.is_some()
    }

    /// 强制驱逐身份（例如账号被停用）
    pub fn evict_identity(&self, user_id: &UserId) -> usize {
        self.hub.registry().evict_identity(user_id)
    }
}
