// 上传传输层抽象
//
// 上传会话只依赖这个 trait，真实实现见 http.rs（reqwest），
// 测试中使用内存实现模拟服务器行为。

use crate::uploader::{ByteRange, VideoCategory};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// 传输层错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// 请求超时（连接或读取）
    #[error("请求超时: {0}")]
    Timeout(String),
    /// 连接失败、连接被重置等网络层错误
    #[error("网络错误: {0}")]
    Network(String),
    /// 服务器返回非预期状态码
    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        /// 服务器给出的错误原因（如 `quotaExceeded`）
        reason: Option<String>,
        message: String,
    },
    /// 响应缺少必要字段或格式错误
    #[error("响应格式错误: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            TransportError::Status { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }

    /// 快捷构造状态码错误
    pub fn status_error(status: u16, message: impl Into<String>) -> Self {
        TransportError::Status {
            status,
            reason: None,
            message: message.into(),
        }
    }
}

/// 分片上传响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkResponse {
    /// 308：服务器已持久化 `[0, confirmed)`
    Incomplete { confirmed: u64 },
    /// 200/201：上传完成，返回资源 ID
    Complete { resource_id: String },
}

/// 已授权账号的频道信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub subscriber_count: u64,
    pub video_count: u64,
    pub view_count: u64,
}

/// 会话创建请求
#[derive(Debug, Clone)]
pub struct InitiateRequest {
    /// 资源元数据（JSON 请求体）
    pub body: Value,
    /// `part` 查询参数（逗号分隔）
    pub parts: String,
    /// 上传总字节数
    pub total_bytes: u64,
    /// 媒体类型
    pub media_type: String,
}

/// 可续传上传协议的传输层
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// 创建上传会话，返回服务器分配的会话 URL
    async fn initiate(
        &self,
        access_token: &str,
        request: &InitiateRequest,
    ) -> Result<String, TransportError>;

    /// 发送一个分片（`range` 为空时发送状态查询）
    async fn put_chunk(
        &self,
        access_token: &str,
        session_url: &str,
        range: ByteRange,
        total: u64,
        body: Vec<u8>,
    ) -> Result<ChunkResponse, TransportError>;

    /// 为已创建的资源设置缩略图
    async fn attach_thumbnail(
        &self,
        access_token: &str,
        resource_id: &str,
        media_type: &str,
        body: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// 查询已授权账号的频道，账号下没有频道时返回 None
    async fn channel_info(&self, access_token: &str) -> Result<Option<ChannelInfo>, TransportError>;

    /// 查询指定地区可用的视频分类
    async fn video_categories(
        &self,
        access_token: &str,
        region_code: &str,
    ) -> Result<Vec<VideoCategory>, TransportError>;
}
