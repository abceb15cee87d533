// 授权相关 API

use crate::auth::CredentialStatus;
use crate::server::{ApiError, ApiResult, AppState};
use crate::uploader::{ChannelInfo, UploadError};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::ApiResponse;

#[derive(Debug, Serialize)]
pub struct AuthUrlResponse {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthCodeRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub error: Option<String>,
}

/// GET /api/v1/auth/url
/// 获取授权页地址
pub async fn get_auth_url(State(state): State<AppState>) -> ApiResult<AuthUrlResponse> {
    let url = state.coordinator.authorization_url(None);
    Ok(Json(ApiResponse::success(AuthUrlResponse { url })))
}

/// GET /api/v1/auth/status
/// 查询授权状态（不会触发刷新）
pub async fn get_auth_status(State(state): State<AppState>) -> ApiResult<CredentialStatus> {
    let status = state.coordinator.credential_status().await;
    Ok(Json(ApiResponse::success(status)))
}

/// POST /api/v1/auth/code
/// 提交授权码
pub async fn submit_auth_code(
    State(state): State<AppState>,
    Json(req): Json<AuthCodeRequest>,
) -> ApiResult<CredentialStatus> {
    let code = req.code.trim();
    if code.is_empty() {
        return Err(ApiError::bad_request("授权码不能为空"));
    }

    info!("API: 提交授权码");
    state.coordinator.bootstrap_credential(code).await.map_err(|e| {
        error!("授权码交换失败: {}", e);
        ApiError::from(e)
    })?;

    let status = state.coordinator.credential_status().await;
    Ok(Json(ApiResponse::success(status)))
}

/// GET /api/v1/auth/channel
/// 当前授权账号的频道信息
pub async fn get_channel(State(state): State<AppState>) -> ApiResult<ChannelInfo> {
    let channel = state.coordinator.channel_info().await.map_err(|e| {
        warn!("查询频道信息失败: {}", e);
        ApiError::from(e)
    })?;
    let channel =
        channel.ok_or_else(|| ApiError::not_found("授权账号下没有 YouTube 频道"))?;
    Ok(Json(ApiResponse::success(channel)))
}

/// POST /api/v1/auth/logout
/// 删除本地凭证
pub async fn logout(State(state): State<AppState>) -> ApiResult<()> {
    info!("API: 退出登录");
    state.coordinator.revoke_credential().await?;
    Ok(Json(ApiResponse::success(())))
}

/// GET /oauth2callback?code=...
/// 授权页回跳地址
pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Response {
    if let Some(err) = query.error {
        warn!("用户拒绝授权: {}", err);
        return (
            StatusCode::BAD_REQUEST,
            Html(format!("<h3>授权失败</h3><p>{}</p>", html_escape(&err))),
        )
            .into_response();
    }

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, Html("<h3>缺少授权码</h3>".to_string())).into_response();
    };

    match state.coordinator.bootstrap_credential(&code).await {
        Ok(_) => {
            info!("OAuth 回调授权成功");
            Html("<h3>授权成功</h3><p>可以关闭此页面并返回应用。</p>".to_string()).into_response()
        }
        Err(e) => {
            error!("OAuth 回调授权失败: {}", e);
            let status = match e {
                UploadError::StorageError(_) | UploadError::CorruptData(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                _ => StatusCode::BAD_REQUEST,
            };
            (
                status,
                Html(format!("<h3>授权失败</h3><p>{}</p>", html_escape(&e.to_string()))),
            )
                .into_response()
        }
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
