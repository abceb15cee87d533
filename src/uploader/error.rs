// 上传错误分类
//
// 调用方按 kind() 穷举处理，每种错误映射为各自的提示文案

use crate::auth::CredentialError;
use serde::{Deserialize, Serialize};

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadErrorKind {
    InputValidation,
    AuthRequired,
    Transient,
    RateLimited,
    SessionExpired,
    UploadFailed,
    StorageError,
    CorruptData,
    Cancelled,
}

impl UploadErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadErrorKind::InputValidation => "input_validation",
            UploadErrorKind::AuthRequired => "auth_required",
            UploadErrorKind::Transient => "transient",
            UploadErrorKind::RateLimited => "rate_limited",
            UploadErrorKind::SessionExpired => "session_expired",
            UploadErrorKind::UploadFailed => "upload_failed",
            UploadErrorKind::StorageError => "storage_error",
            UploadErrorKind::CorruptData => "corrupt_data",
            UploadErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for UploadErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 失败现场（用于诊断）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    /// 当前分片已尝试次数
    pub attempts: u32,
    /// 最后一次 HTTP 状态码
    pub last_status: Option<u16>,
    /// 服务器已确认的字节偏移
    pub offset: u64,
}

impl std::fmt::Display for FailureContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "attempts={}, offset={}", self.attempts, self.offset)?;
        if let Some(status) = self.last_status {
            write!(f, ", status={}", status)?;
        }
        Ok(())
    }
}

/// 上传错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    /// 文件或元数据不合法（不重试）
    #[error("输入校验失败: {0}")]
    InputValidation(String),

    /// 没有可用凭证（不自动重试）
    #[error("需要重新授权: {0}")]
    AuthRequired(String),

    /// 网络/5xx 临时错误（会话内部原地重试，耗尽后以 UploadFailed 返回）
    #[error("临时错误: {message} ({context})")]
    Transient {
        message: String,
        context: FailureContext,
    },

    /// 配额/限流
    #[error("配额限流: {message} ({context})")]
    RateLimited {
        message: String,
        context: FailureContext,
    },

    /// 会话重建次数耗尽
    #[error("上传会话已过期: {message} (已重建 {restarts} 次, {context})")]
    SessionExpired {
        message: String,
        restarts: u32,
        context: FailureContext,
    },

    /// 上传失败（重试耗尽或不可重试）
    #[error("上传失败: {message} ({context})")]
    UploadFailed {
        message: String,
        context: FailureContext,
    },

    /// 凭证存储读写失败
    #[error("凭证存储失败: {0}")]
    StorageError(String),

    /// 凭证数据损坏
    #[error("凭证数据损坏: {0}")]
    CorruptData(String),

    /// 调用方取消
    #[error("上传已取消 (offset={offset})")]
    Cancelled { offset: u64 },
}

impl UploadError {
    pub fn kind(&self) -> UploadErrorKind {
        match self {
            UploadError::InputValidation(_) => UploadErrorKind::InputValidation,
            UploadError::AuthRequired(_) => UploadErrorKind::AuthRequired,
            UploadError::Transient { .. } => UploadErrorKind::Transient,
            UploadError::RateLimited { .. } => UploadErrorKind::RateLimited,
            UploadError::SessionExpired { .. } => UploadErrorKind::SessionExpired,
            UploadError::UploadFailed { .. } => UploadErrorKind::UploadFailed,
            UploadError::StorageError(_) => UploadErrorKind::StorageError,
            UploadError::CorruptData(_) => UploadErrorKind::CorruptData,
            UploadError::Cancelled { .. } => UploadErrorKind::Cancelled,
        }
    }

    pub fn context(&self) -> Option<&FailureContext> {
        match self {
            UploadError::Transient { context, .. }
            | UploadError::RateLimited { context, .. }
            | UploadError::SessionExpired { context, .. }
            | UploadError::UploadFailed { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        UploadError::InputValidation(message.into())
    }

    pub fn failed(message: impl Into<String>, context: FailureContext) -> Self {
        UploadError::UploadFailed {
            message: message.into(),
            context,
        }
    }
}

impl From<CredentialError> for UploadError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::NotFound => UploadError::AuthRequired("本地没有已保存的凭证".to_string()),
            CredentialError::AuthRequired(msg) => UploadError::AuthRequired(msg),
            CredentialError::Exchange { message, .. } => UploadError::AuthRequired(message),
            CredentialError::StorageError { .. } => UploadError::StorageError(err.to_string()),
            CredentialError::CorruptData(msg) => UploadError::CorruptData(msg),
        }
    }
}
