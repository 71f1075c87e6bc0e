use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{publish_queue, RealtimeHub, RealtimeService, SystemClock};
use config::AppConfig;
use domain::{Account, BranchId, Role, UserId};
use futures_util::StreamExt;
use infrastructure::{InMemoryAccountRepository, JwtIdentityResolver};
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::{sleep, timeout},
};
use tokio_tungstenite::{tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use web_api::{router, AppState};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn account(id: &str, role: Role, branch: Option<&str>, active: bool) -> Account {
    Account {
        id: UserId::from(id),
        display_name: id.to_uppercase(),
        role,
        branch_id: branch.map(BranchId::from),
        active,
    }
}

/// 测试账号：
/// - a1 总部管理员
/// - m1 B1 店长
/// - s1 / s2 分别属于 B1 / B2 的店员
/// - r1 专用于限流测试
/// - x1 已停用
fn seed_accounts() -> Vec<Account> {
    vec![
        account("a1", Role::Admin, None, true),
        account("m1", Role::Manager, Some("B1"), true),
        account("s1", Role::Staff, Some("B1"), true),
        account("s2", Role::Staff, Some("B2"), true),
        account("r1", Role::Staff, Some("B1"), true),
        account("x1", Role::Staff, Some("B1"), false),
    ]
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<RealtimeHub>,
    resolver: Arc<JwtIdentityResolver>,
    shutdown: Option<oneshot::Sender<()>>,
    broadcaster_shutdown: CancellationToken,
}

impl TestServer {
    pub async fn start() -> Self {
        let config = AppConfig::development();
        let accounts = Arc::new(InMemoryAccountRepository::with_accounts(seed_accounts()));
        let resolver = Arc::new(JwtIdentityResolver::new(config.jwt.clone(), accounts));

        let hub = Arc::new(RealtimeHub::new(&config, Arc::new(SystemClock)));
        let realtime = Arc::new(RealtimeService::new(resolver.clone(), hub.clone()));

        let (publisher, events) = publish_queue(config.broadcast.capacity);
        let broadcaster_shutdown = CancellationToken::new();
        tokio::spawn(
            hub.broadcaster()
                .clone()
                .run(events, broadcaster_shutdown.clone()),
        );

        let state = AppState::new(
            realtime,
            publisher,
            resolver.clone(),
            config.broadcast.outbound_buffer,
        );
        let app = router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // allow server to start
        sleep(Duration::from_millis(100)).await;

        Self {
            addr,
            hub,
            resolver,
            shutdown: Some(shutdown_tx),
            broadcaster_shutdown,
        }
    }

    pub fn token(&self, user_id: &str) -> String {
        self.resolver
            .issue_token(&UserId::from(user_id))
            .expect("issue token")
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("ws://{}{}?token={}", self.addr, path, token),
            None => format!("ws://{}{}", self.addr, path),
        }
    }

    /// 以指定账号建立连接，并读掉握手后的 `connected` 帧
    pub async fn connect(&self, path: &str, user_id: &str) -> (WsStream, Value) {
        let token = self.token(user_id);
        let (mut ws, _) = tokio_tungstenite::connect_async(self.ws_url(path, Some(&token)))
            .await
            .expect("ws connect");
        let connected = next_json(&mut ws).await;
        assert_eq!(connected["type"], "connected");
        (ws, connected)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.broadcaster_shutdown.cancel();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// 读取下一条文本帧，超时则失败
pub async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let message = timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("ws error");
        if let TungsteniteMessage::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("frame json");
        }
    }
}

pub fn rooms_of(connected: &Value) -> Vec<String> {
    connected["data"]["rooms"]
        .as_array()
        .expect("rooms array")
        .iter()
        .filter_map(|room| room.as_str().map(str::to_string))
        .collect()
}
