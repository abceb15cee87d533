// 上传协调器
//
// 对外的上传入口：校验 → 获取凭证 → 驱动会话 → 设置缩略图
// 缩略图失败不回滚已创建的视频，只作为警告返回

use crate::auth::{Credential, CredentialManager, CredentialStatus};
use crate::config::{RetryConfig, UploadConfig};
use crate::uploader::{
    builtin_categories, ChannelInfo, ErrorClass, FailureContext, ProgressCallback, RetryPolicy,
    SessionContext, ThumbnailAsset, TransportError, UploadError, UploadSession, UploadTarget,
    UploadTransport, VideoCategory, VideoMetadata, DEFAULT_REGION_CODE,
};
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 上传结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub resource_id: String,
    pub watch_url: String,
    pub title: String,
    pub total_bytes: u64,
    pub restarts: u32,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// 非致命问题（如缩略图设置失败）
    pub warnings: Vec<String>,
}

fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

pub fn watch_url(resource_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", resource_id)
}

/// 数据接口错误（单次请求，不重试）
fn api_error(action: &str, err: TransportError) -> UploadError {
    if err.status() == Some(401) {
        return UploadError::AuthRequired(format!("{}: 访问令牌被拒绝: {}", action, err));
    }
    let context = FailureContext {
        attempts: 1,
        last_status: err.status(),
        offset: 0,
    };
    let message = format!("{}失败: {}", action, err);
    match RetryPolicy::classify(&err) {
        ErrorClass::RateLimited => UploadError::RateLimited { message, context },
        _ => UploadError::failed(message, context),
    }
}

/// 上传协调器
pub struct UploadCoordinator {
    credentials: Arc<CredentialManager>,
    transport: Arc<dyn UploadTransport>,
    config: UploadConfig,
    policy: RetryPolicy,
}

impl UploadCoordinator {
    pub fn new(
        credentials: Arc<CredentialManager>,
        transport: Arc<dyn UploadTransport>,
        config: UploadConfig,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            credentials,
            transport,
            config,
            policy: RetryPolicy::from_config(retry),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// 本地校验（不发起网络请求）
    pub fn prepare(
        &self,
        file_path: impl Into<PathBuf>,
        metadata: VideoMetadata,
        thumbnail: Option<PathBuf>,
    ) -> Result<UploadTarget, UploadError> {
        UploadTarget::from_path(file_path, metadata, thumbnail, self.config.max_file_size)
    }

    /// 校验并上传
    pub async fn upload_file(
        &self,
        file_path: impl Into<PathBuf>,
        metadata: VideoMetadata,
        thumbnail: Option<PathBuf>,
        progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let target = self.prepare(file_path, metadata, thumbnail)?;
        self.upload(&target, progress, cancel).await
    }

    /// 上传目标
    ///
    /// 发起任何网络请求前重新执行本地校验
    pub async fn upload(
        &self,
        target: &UploadTarget,
        progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        target.validate(self.config.max_file_size)?;

        // AuthRequired 原样返回给调用方
        self.credentials.acquire().await?;

        let ctx = SessionContext {
            transport: self.transport.clone(),
            tokens: self.credentials.clone(),
            policy: self.policy.clone(),
            chunk_size: self.config.chunk_size,
            bandwidth_limit: self.config.bandwidth_limit,
            max_session_restarts: self.config.max_session_restarts,
        };
        let mut session = UploadSession::new(ctx, target).with_cancel(cancel);
        if let Some(callback) = progress {
            session = session.with_progress(callback);
        }
        let completion = session.run().await?;

        let mut warnings = Vec::new();
        if let Some(thumbnail) = &target.thumbnail {
            if let Err(message) = self.attach_thumbnail(&completion.resource_id, thumbnail).await {
                warn!("缩略图设置失败，视频已上传: {}", message);
                warnings.push(format!("缩略图设置失败: {}", message));
            }
        }

        let outcome = UploadOutcome {
            watch_url: watch_url(&completion.resource_id),
            resource_id: completion.resource_id,
            title: target.metadata.title.trim().to_string(),
            total_bytes: completion.total_bytes,
            restarts: completion.restarts,
            elapsed: completion.elapsed,
            warnings,
        };
        info!("上传成功: {} ({})", outcome.title, outcome.watch_url);
        Ok(outcome)
    }

    async fn attach_thumbnail(
        &self,
        resource_id: &str,
        thumbnail: &ThumbnailAsset,
    ) -> Result<(), String> {
        let body = thumbnail.read().await.map_err(|e| e.to_string())?;
        let credential = self
            .credentials
            .acquire()
            .await
            .map_err(|e| e.to_string())?;
        self.transport
            .attach_thumbnail(
                &credential.access_token,
                resource_id,
                &thumbnail.media_type,
                body,
            )
            .await
            .map_err(|e| e.to_string())
    }

    /// 已授权账号的频道信息，同时用来确认凭证可用
    pub async fn channel_info(&self) -> Result<Option<ChannelInfo>, UploadError> {
        let credential = self.credentials.acquire().await?;
        let channel = self
            .transport
            .channel_info(&credential.access_token)
            .await
            .map_err(|e| api_error("查询频道信息", e))?;
        match &channel {
            Some(channel) => info!("已连接频道: {} ({})", channel.title, channel.channel_id),
            None => warn!("授权账号下没有频道"),
        }
        Ok(channel)
    }

    /// 可用的视频分类
    ///
    /// 优先实时查询；未授权、请求失败或结果为空时返回内置分类表
    pub async fn video_categories(&self) -> Vec<VideoCategory> {
        match self.fetch_categories().await {
            Ok(categories) if !categories.is_empty() => {
                info!("获取到 {} 个视频分类", categories.len());
                categories
            }
            Ok(_) => {
                warn!("视频分类列表为空，使用内置分类表");
                builtin_categories()
            }
            Err(e) => {
                warn!("获取视频分类失败，使用内置分类表: {}", e);
                builtin_categories()
            }
        }
    }

    async fn fetch_categories(&self) -> Result<Vec<VideoCategory>, UploadError> {
        let credential = self.credentials.acquire().await?;
        self.transport
            .video_categories(&credential.access_token, DEFAULT_REGION_CODE)
            .await
            .map_err(|e| api_error("查询视频分类", e))
    }

    pub async fn acquire_credential(&self) -> Result<Credential, UploadError> {
        Ok(self.credentials.acquire().await?)
    }

    pub async fn bootstrap_credential(&self, code: &str) -> Result<Credential, UploadError> {
        Ok(self.credentials.bootstrap(code).await?)
    }

    pub async fn revoke_credential(&self) -> Result<(), UploadError> {
        Ok(self.credentials.revoke().await?)
    }

    pub async fn credential_status(&self) -> CredentialStatus {
        self.credentials.status().await
    }

    pub fn authorization_url(&self, state: Option<&str>) -> String {
        self.credentials.authorization_url(state)
    }
}
