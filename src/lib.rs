// YouTube Uploader Rust Library
// 可续传视频上传与凭证生命周期管理核心库

// 认证模块
pub mod auth;

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// Web服务器模块
pub mod server;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use auth::{Credential, CredentialError, CredentialManager, CredentialStore};
pub use config::AppConfig;
pub use server::AppState;
pub use uploader::{
    UploadCoordinator, UploadError, UploadErrorKind, UploadManager, UploadOutcome, UploadTarget,
    VideoMetadata,
};
