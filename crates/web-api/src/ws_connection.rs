use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{Identity, Namespace, Transport};
use futures_util::{SinkExt, StreamExt};
use infrastructure::channel_transport;
use tracing::{debug, warn};

use crate::state::AppState;

/// 单条 WebSocket 连接的生命周期：注册、收发、断开清理
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    identity: Identity,
    namespace: Namespace,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState, identity: Identity, namespace: Namespace) -> Self {
        Self {
            socket,
            state,
            identity,
            namespace,
        }
    }

    pub async fn run(self) {
        let WebSocketConnection {
            socket,
            state,
            identity,
            namespace,
        } = self;

        let (transport, mut outbound) = channel_transport(state.outbound_buffer);
        let admission = state
            .realtime
            .register(identity, namespace, transport.clone());
        let connection_id = admission.connection.id;

        let (mut sender, mut receiver) = socket.split();

        // 发送任务：把注册表放入队列的帧写回客户端，服务端关闭时发送 Close
        let mut send_task = tokio::spawn(async move {
            loop {
                match outbound.next().await {
                    Some(frame) => {
                        if let Err(e) = sender.send(WsMessage::Text(frame.into())).await {
                            debug!(connection_id = %connection_id, "write failed: {}", e);
                            break;
                        }
                    }
                    None => {
                        let _ = sender.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
        });

        // 接收任务：解析客户端命令
        let realtime = state.realtime.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(message) = receiver.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => {
                        realtime.handle_frame(&connection_id, text.as_str());
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(WsMessage::Binary(_)) => {
                        debug!(connection_id = %connection_id, "binary frame ignored");
                    }
                    Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
                    Err(e) => {
                        warn!(connection_id = %connection_id, "websocket read error: {}", e);
                        break;
                    }
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        transport.close();
        state.realtime.disconnect(&connection_id);
    }
}
