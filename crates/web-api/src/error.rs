use application::HandshakeError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{AuthError, RealtimeError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn malformed_event(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "MALFORMED_EVENT", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        ApiError::new(StatusCode::UNAUTHORIZED, error.code(), error.to_string())
    }
}

impl From<HandshakeError> for ApiError {
    fn from(error: HandshakeError) -> Self {
        match error {
            HandshakeError::Auth(err) => err.into(),
            HandshakeError::RateLimited { .. } => ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                error.code(),
                error.to_string(),
            ),
        }
    }
}

impl From<RealtimeError> for ApiError {
    fn from(error: RealtimeError) -> Self {
        let status = match &error {
            RealtimeError::MalformedEvent { .. } => StatusCode::BAD_REQUEST,
            RealtimeError::Authorization { .. } => StatusCode::FORBIDDEN,
            RealtimeError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RealtimeError::RoomNotFound { .. } => StatusCode::NOT_FOUND,
            RealtimeError::QueueFull | RealtimeError::QueueClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RealtimeError::Transport { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, error.code(), error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
