use crate::server::{ApiError, ApiResult, AppState};
use crate::uploader::{UploadTask, VideoCategory, VideoMetadata};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{error, info};

use super::ApiResponse;

/// 创建上传任务请求
#[derive(Debug, Deserialize)]
pub struct CreateUploadRequest {
    /// 本地视频文件路径
    pub file_path: PathBuf,
    pub metadata: VideoMetadata,
    /// 可选缩略图路径
    #[serde(default)]
    pub thumbnail_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct CreateUploadResponse {
    pub task_id: String,
}

/// POST /api/v1/uploads
/// 创建上传任务（校验通过后立即开始上传）
pub async fn create_upload(
    State(app_state): State<AppState>,
    Json(req): Json<CreateUploadRequest>,
) -> ApiResult<CreateUploadResponse> {
    let task_id = app_state
        .upload_manager
        .create_task(req.file_path, req.metadata, req.thumbnail_path)
        .map_err(|e| {
            error!("创建上传任务失败: {}", e);
            ApiError::from(e)
        })?;

    info!("创建上传任务成功: {}", task_id);
    Ok(Json(ApiResponse::success(CreateUploadResponse { task_id })))
}

/// GET /api/v1/uploads
/// 获取所有上传任务
pub async fn get_all_uploads(State(app_state): State<AppState>) -> ApiResult<Vec<UploadTask>> {
    let tasks = app_state.upload_manager.get_all_tasks();
    Ok(Json(ApiResponse::success(tasks)))
}

/// GET /api/v1/uploads/:id
/// 获取指定上传任务
pub async fn get_upload(
    State(app_state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<UploadTask> {
    let task = app_state
        .upload_manager
        .get_task(&task_id)
        .ok_or_else(|| ApiError::not_found(format!("任务不存在: {}", task_id)))?;
    Ok(Json(ApiResponse::success(task)))
}

/// POST /api/v1/uploads/:id/cancel
/// 取消上传任务
pub async fn cancel_upload(
    State(app_state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<String> {
    if app_state.upload_manager.get_task(&task_id).is_none() {
        return Err(ApiError::not_found(format!("任务不存在: {}", task_id)));
    }
    app_state
        .upload_manager
        .cancel_task(&task_id)
        .map_err(|e| ApiError::conflict(e.to_string()))?;
    Ok(Json(ApiResponse::success("已发送取消请求".to_string())))
}

/// DELETE /api/v1/uploads/:id
/// 删除已结束的上传任务
pub async fn delete_upload(
    State(app_state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<String> {
    if app_state.upload_manager.get_task(&task_id).is_none() {
        return Err(ApiError::not_found(format!("任务不存在: {}", task_id)));
    }
    app_state
        .upload_manager
        .delete_task(&task_id)
        .map_err(|e| ApiError::conflict(e.to_string()))?;
    Ok(Json(ApiResponse::success("任务已删除".to_string())))
}

/// GET /api/v1/categories
/// 视频分类（查询失败时返回内置分类表）
pub async fn get_categories(State(app_state): State<AppState>) -> ApiResult<Vec<VideoCategory>> {
    let categories = app_state.coordinator.video_categories().await;
    Ok(Json(ApiResponse::success(categories)))
}
