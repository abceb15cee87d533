// Web服务器模块

pub mod error;
pub mod handlers;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

/// 健康检查响应结构
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
}

/// 健康检查处理器
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "youtube-uploader-rust".to_string(),
    })
}

/// 构建全部路由
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // 授权 API
        .route("/auth/url", get(handlers::get_auth_url))
        .route("/auth/status", get(handlers::get_auth_status))
        .route("/auth/code", post(handlers::submit_auth_code))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/channel", get(handlers::get_channel))
        // 上传 API
        .route(
            "/uploads",
            post(handlers::create_upload).get(handlers::get_all_uploads),
        )
        .route(
            "/uploads/:id",
            get(handlers::get_upload).delete(handlers::delete_upload),
        )
        .route("/uploads/:id/cancel", post(handlers::cancel_upload))
        .route("/categories", get(handlers::get_categories));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/oauth2callback", get(handlers::oauth_callback))
        .route("/health", get(health_check))
        .with_state(state)
}
