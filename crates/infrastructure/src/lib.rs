//! 基础设施层实现。
//!
//! 提供 JWT 身份解析、内存账号目录、基于通道的连接传输以及进程内存采样，
//! 实现应用/领域层定义的接口。

pub mod accounts;
pub mod auth;
pub mod memory;
pub mod transport;

pub use accounts::InMemoryAccountRepository;
pub use auth::{Claims, JwtIdentityResolver};
pub use memory::SysinfoMemoryProbe;
pub use transport::{channel_transport, ChannelTransport, OutboundFrames};
