//! JWT认证基础设施实现
//!
//! 校验握手凭证的签名与有效期，再到账号目录确认账号存在且处于启用状态。

use std::sync::Arc;

use application::IdentityResolver;
use async_trait::async_trait;
use config::JwtConfig;
use domain::{AccountRepository, AuthError, Identity, UserId};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// 账号ID
    pub sub: String,
    pub iat: i64,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// 基于 JWT 的身份解析器
#[derive(Clone)]
pub struct JwtIdentityResolver {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    accounts: Arc<dyn AccountRepository>,
}

impl JwtIdentityResolver {
    pub fn new(config: JwtConfig, accounts: Arc<dyn AccountRepository>) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
            accounts,
        }
    }

    /// 签发凭证（供运维工具与测试使用）
    pub fn issue_token(&self, user_id: &UserId) -> Result<String, AuthError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| AuthError::invalid(format!("token generation failed: {}", err)))
    }

    /// 验证签名与有效期
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredCredential,
                _ => AuthError::invalid(err.to_string()),
            })
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, credential: &str) -> Result<Identity, AuthError> {
        let token = credential.strip_prefix("Bearer ").unwrap_or(credential);
        let claims = self.verify_token(token)?;
        let user_id = UserId::new(claims.sub);

        let account = self
            .accounts
            .find_by_id(&user_id)
            .await
            .map_err(|err| {
                warn!(user_id = %user_id, "account lookup failed: {}", err);
                AuthError::invalid("account lookup failed")
            })?
            .ok_or_else(|| AuthError::invalid("unknown account"))?;

        if !account.active {
            debug!(user_id = %user_id, "credential belongs to inactive account");
            return Err(AuthError::InactiveAccount);
        }
        Ok(account.identity())
    }
}
