//! 凭证提取与接口鉴权
//!
//! WebSocket 握手时凭证可以放在 `Authorization: Bearer` 头里，
//! 也可以放在 `token` 查询参数里（浏览器无法为 WebSocket 设置请求头）。

use axum::http::{header::AUTHORIZATION, HeaderMap};
use domain::{AuthError, Identity};

use crate::error::ApiError;
use crate::state::AppState;

/// 提取握手凭证，请求头优先
pub fn extract_credential(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    from_header
        .or_else(|| query_token.map(str::trim).filter(|token| !token.is_empty()))
        .map(str::to_string)
}

/// 内部接口只允许管理员调用
pub async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let credential = extract_credential(headers, None).ok_or(AuthError::MissingCredential)?;
    let identity = state.resolver.resolve(&credential).await?;
    if !identity.is_admin() {
        tracing::debug!(user_id = %identity.id, "non-admin caller rejected");
        return Err(ApiError::forbidden("admin role required"));
    }
    Ok(identity)
}
