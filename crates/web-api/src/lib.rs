//! Web API 层。
//!
//! 提供 Axum 路由：三个 WebSocket 通道、内部事件发布接口和统计接口，
//! 将请求委托给应用层的实时推送服务。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::extract_credential;
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
