use std::sync::Arc;

use application::{EventPublisher, IdentityResolver, RealtimeService};

#[derive(Clone)]
pub struct AppState {
    pub realtime: Arc<RealtimeService>,
    pub publisher: EventPublisher,
    /// 校验 HTTP 接口的调用方，不计入握手限流
    pub resolver: Arc<dyn IdentityResolver>,
    /// 单连接发送队列容量
    pub outbound_buffer: usize,
}

impl AppState {
    pub fn new(
        realtime: Arc<RealtimeService>,
        publisher: EventPublisher,
        resolver: Arc<dyn IdentityResolver>,
        outbound_buffer: usize,
    ) -> Self {
        Self {
            realtime,
            publisher,
            resolver,
            outbound_buffer,
        }
    }
}
