use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use youtube_uploader_rust::{
    config::{LogConfig, DEFAULT_CONFIG_PATH},
    logging, server, AppConfig, AppState,
};

/// 加载日志配置
///
/// 日志系统要先于完整配置初始化，这里只读取 [log] 段，失败时返回默认配置
async fn load_log_config() -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(DEFAULT_CONFIG_PATH).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }

    LogConfig::default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 先初始化日志系统（必须保持 _log_guard 存活）
    let log_config = load_log_config().await;
    let _log_guard = logging::init_logging(&log_config);

    info!("YouTube Uploader Rust v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_or_default(DEFAULT_CONFIG_PATH).await;
    if config.oauth.client_id.is_empty() || config.oauth.client_secret.is_empty() {
        tracing::warn!(
            "未配置 OAuth 客户端（YOUTUBE_CLIENT_ID / YOUTUBE_CLIENT_SECRET），授权将无法完成"
        );
    }
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let app_state = AppState::new(config)?;
    info!("应用状态初始化完成");

    let status = app_state.credentials.status().await;
    if status.stored {
        info!("已找到本地凭证 (有效: {}, 可刷新: {})", status.valid, status.refreshable);
    } else {
        info!("尚未授权，请访问授权地址: {}", app_state.credentials.authorization_url(None));
    }

    // 配置中间件层
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http()) // HTTP 请求日志
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let app = server::build_router(app_state.clone()).layer(middleware);

    info!("服务器启动在: http://{}", addr);
    info!("API 基础路径: http://{}/api/v1", addr);
    info!("授权回调: http://{}/oauth2callback", addr);
    info!("健康检查: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("服务器错误: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C，开始关闭...");
        }
    }

    app_state.shutdown();
    info!("应用已安全退出");

    Ok(())
}
