//! 主应用程序入口
//!
//! 组装实时推送服务：账号目录、身份解析、房间与连接注册表、事件广播器、
//! 健康监控，然后启动 Axum 服务。

use std::sync::Arc;

use application::{
    publish_queue, Clock, HealthMonitor, MonitorSettings, RealtimeHub, RealtimeService,
    SystemClock,
};
use config::AppConfig;
use domain::AccountRepository;
use infrastructure::{InMemoryAccountRepository, JwtIdentityResolver, SysinfoMemoryProbe};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env_with_defaults();
    if let Err(e) = config.validate() {
        tracing::warn!("配置校验未通过，继续使用开发默认值: {}", e);
    }

    // 账号目录
    let accounts: Arc<dyn AccountRepository> = match &config.accounts_file {
        Some(path) => Arc::new(InMemoryAccountRepository::from_json_file(path)?),
        None => {
            tracing::warn!("未设置 ACCOUNTS_FILE，账号目录为空，所有握手都会被拒绝");
            Arc::new(InMemoryAccountRepository::new())
        }
    };
    let resolver = Arc::new(JwtIdentityResolver::new(config.jwt.clone(), accounts));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let hub = Arc::new(RealtimeHub::new(&config, clock));
    let realtime = Arc::new(RealtimeService::new(resolver.clone(), hub.clone()));

    let shutdown = CancellationToken::new();

    // 事件广播器：单消费者按提交顺序投递
    let (publisher, events) = publish_queue(config.broadcast.capacity);
    let broadcaster_task = tokio::spawn(
        hub.broadcaster()
            .clone()
            .run(events, shutdown.clone()),
    );

    // 清理与健康监控定时任务
    let monitor = Arc::new(HealthMonitor::new(
        hub.clone(),
        publisher.clone(),
        Arc::new(SysinfoMemoryProbe::new()),
        MonitorSettings::from(&config.monitor),
    ));
    let monitor_tasks = monitor.spawn(shutdown.clone());

    let state = AppState::new(
        realtime,
        publisher,
        resolver,
        config.broadcast.outbound_buffer,
    );
    let app = router(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("实时推送服务启动在 http://{}", address);

    let server_shutdown = shutdown.clone();
    let server_hub = hub.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("监听退出信号失败: {}", e);
            }
            tracing::info!("收到退出信号，正在关闭");
            server_shutdown.cancel();
            server_hub.shutdown();
        })
        .await?;

    shutdown.cancel();
    for task in monitor_tasks {
        let _ = task.await;
    }
    let _ = broadcaster_task.await;
    tracing::info!("服务已停止");

    Ok(())
}
