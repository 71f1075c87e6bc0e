//! 领域服务接口定义

pub mod websocket_service;

pub use websocket_service::*;
