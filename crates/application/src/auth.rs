use async_trait::async_trait;
use domain::{AuthError, Identity};

/// 握手凭证解析
///
/// 校验凭证（签名、有效期）并查询账号状态，得到连接的身份与作用域。
/// 会被大量连接并发调用。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<Identity, AuthError>;
}
