use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use domain::{BranchId, EventPayload, Namespace, RealtimeEvent, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::auth::{extract_credential, require_admin};
use crate::error::ApiError;
use crate::state::AppState;
use crate::ws_connection::WebSocketConnection;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(general_ws))
        .route("/ws/admin", get(admin_ws))
        .route("/ws/pos", get(pos_ws))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(publish_event))
        .route("/realtime/stats", get(realtime_stats))
        .route("/realtime/evict/{user_id}", post(evict_identity))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct HandshakeQuery {
    token: Option<String>,
}

async fn general_ws(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HandshakeQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    upgrade(state, Namespace::General, &headers, query, ws).await
}

async fn admin_ws(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HandshakeQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    upgrade(state, Namespace::Admin, &headers, query, ws).await
}

async fn pos_ws(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HandshakeQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    upgrade(state, Namespace::Pos, &headers, query, ws).await
}

/// 握手在升级前完成，失败时直接以 HTTP 错误拒绝
async fn upgrade(
    state: AppState,
    namespace: Namespace,
    headers: &HeaderMap,
    query: HandshakeQuery,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let credential = extract_credential(headers, query.token.as_deref());
    let identity = state.realtime.authenticate(credential.as_deref()).await?;

    Ok(ws.on_upgrade(move |socket| async move {
        WebSocketConnection::new(socket, state, identity, namespace)
            .run()
            .await;
    }))
}

/// 内部发布请求：服务端分配事件 id 和时间戳
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishEventRequest {
    #[serde(default)]
    branch_id: Option<BranchId>,
    #[serde(default)]
    user_id: Option<UserId>,
    #[serde(flatten)]
    payload: EventPayload,
}

#[derive(Debug, Serialize)]
struct PublishAccepted {
    id: String,
}

async fn publish_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = require_admin(&state, &headers).await?;

    let request: PublishEventRequest =
        serde_json::from_value(body).map_err(|e| ApiError::malformed_event(e.to_string()))?;
    let mut event = RealtimeEvent::new(request.payload);
    event.branch_id = request.branch_id;
    event.user_id = request.user_id;

    let id = state.publisher.publish(event).await?;
    info!(event_id = %id, caller = %caller.id, "event accepted for publishing");

    Ok((StatusCode::ACCEPTED, Json(PublishAccepted { id })))
}

async fn realtime_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.realtime.hub().stats()))
}

#[derive(Debug, Serialize)]
struct EvictionResult {
    evicted: usize,
}

/// 强制断开某个身份的全部连接，例如账号被停用后
async fn evict_identity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = require_admin(&state, &headers).await?;
    let evicted = state.realtime.evict_identity(&UserId::from(user_id.as_str()));
    info!(user_id = %user_id, evicted, caller = %caller.id, "identity evicted by admin");
    Ok(Json(EvictionResult { evicted }))
}
