//! 基于通道的连接传输
//!
//! 注册表通过 [`ChannelTransport`] 非阻塞地把帧放入有界队列，
//! WebSocket 写任务从 [`OutboundFrames`] 取帧写回客户端。

use std::sync::Arc;

use domain::{Transport, TransportError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct ChannelTransport {
    sender: mpsc::Sender<String>,
    closed: CancellationToken,
}

/// 写任务持有的接收端
pub struct OutboundFrames {
    receiver: mpsc::Receiver<String>,
    closed: CancellationToken,
}

/// 创建一对传输句柄与接收端
pub fn channel_transport(buffer: usize) -> (Arc<ChannelTransport>, OutboundFrames) {
    let (sender, receiver) = mpsc::channel(buffer.max(1));
    let closed = CancellationToken::new();
    (
        Arc::new(ChannelTransport {
            sender,
            closed: closed.clone(),
        }),
        OutboundFrames { receiver, closed },
    )
}

impl Transport for ChannelTransport {
    fn send(&self, payload: &str) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.sender
            .try_send(payload.to_string())
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_alive(&self) -> bool {
        !self.closed.is_cancelled() && !self.sender.is_closed()
    }
}

impl OutboundFrames {
    /// 等待下一帧；服务端关闭连接或所有发送端释放后返回 `None`
    pub async fn next(&mut self) -> Option<String> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            frame = self.receiver.recv() => frame,
        }
    }

    /// 服务端是否要求关闭连接
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
