use domain::AuthError;
use thiserror::Error;

use crate::rate_limiter::RateLimitError;

/// 握手被拒绝的原因
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("rate limit exceeded: {current}/{max} attempts per window")]
    RateLimited { current: u32, max: u32 },
}

impl HandshakeError {
    pub fn code(&self) -> &'static str {
        match self {
            HandshakeError::Auth(err) => err.code(),
            HandshakeError::RateLimited { .. } => "RATE_LIMITED",
        }
    }
}

impl From<RateLimitError> for HandshakeError {
    fn from(value: RateLimitError) -> Self {
        HandshakeError::RateLimited {
            current: value.current,
            max: value.max,
        }
    }
}
