// 凭证相关错误

use std::path::PathBuf;

/// 凭证存储与生命周期错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// 本地没有保存凭证
    #[error("未找到凭证文件")]
    NotFound,
    /// 凭证目录不可写或文件读写失败
    #[error("凭证存储失败 ({path:?}): {message}")]
    StorageError { path: PathBuf, message: String },
    /// 解密或解析失败（密钥丢失、文件截断、被篡改）
    #[error("凭证数据损坏: {0}")]
    CorruptData(String),
    /// 没有可用凭证，需要重新授权
    #[error("需要重新授权: {0}")]
    AuthRequired(String),
    /// 授权码交换失败
    #[error("令牌交换失败 (status={status:?}): {message}")]
    Exchange { status: Option<u16>, message: String },
}

impl CredentialError {
    pub(crate) fn storage(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        CredentialError::StorageError {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
