// 配置管理模块

use crate::uploader::chunk::{CHUNK_GRANULARITY, DEFAULT_UPLOAD_CHUNK_SIZE};
use crate::uploader::target::DEFAULT_MAX_FILE_SIZE;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// OAuth 配置
    #[serde(default)]
    pub oauth: OAuthConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 重试配置
    #[serde(default)]
    pub retry: RetryConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_server_host")]
    pub host: String,
    /// 监听端口（同时作为 OAuth 回调端口）
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// OAuth 授权配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// 客户端 ID（可被环境变量 YOUTUBE_CLIENT_ID 覆盖）
    #[serde(default)]
    pub client_id: String,
    /// 客户端密钥（可被环境变量 YOUTUBE_CLIENT_SECRET 覆盖）
    #[serde(default)]
    pub client_secret: String,
    /// 授权页地址
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    /// 令牌交换地址
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    /// 回调地址
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    /// 申请的权限范围
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// 凭证目录（加密凭证文件和密钥文件都在这里）
    #[serde(default = "default_token_dir")]
    pub token_dir: PathBuf,
    /// 加密凭证文件名
    #[serde(default = "default_token_file")]
    pub token_file: String,
    /// 密钥文件名
    #[serde(default = "default_key_file")]
    pub key_file: String,
    /// 过期前提前刷新的安全余量（秒）
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
    /// 令牌交换请求超时（秒）
    #[serde(default = "default_oauth_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_redirect_uri() -> String {
    format!("http://localhost:{}/oauth2callback", default_server_port())
}

fn default_scopes() -> Vec<String> {
    vec![
        crate::auth::SCOPE_YOUTUBE_UPLOAD.to_string(),
        crate::auth::SCOPE_YOUTUBE.to_string(),
    ]
}

fn default_token_dir() -> PathBuf {
    PathBuf::from("data/tokens")
}

fn default_token_file() -> String {
    "youtube_token.enc".to_string()
}

fn default_key_file() -> String {
    ".encryption_key".to_string()
}

fn default_refresh_margin_secs() -> u64 {
    60
}

fn default_oauth_timeout_secs() -> u64 {
    30
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_uri: default_auth_uri(),
            token_uri: default_token_uri(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            token_dir: default_token_dir(),
            token_file: default_token_file(),
            key_file: default_key_file(),
            refresh_margin_secs: default_refresh_margin_secs(),
            request_timeout_secs: default_oauth_timeout_secs(),
        }
    }
}

impl OAuthConfig {
    pub fn token_path(&self) -> PathBuf {
        self.token_dir.join(&self.token_file)
    }

    pub fn key_path(&self) -> PathBuf {
        self.token_dir.join(&self.key_file)
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 分片大小（字节），必须是 256KB 的整数倍
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 单文件大小上限（字节，默认 256GB）
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// 带宽上限（字节/秒），0 表示不限速
    #[serde(default)]
    pub bandwidth_limit: u64,
    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 单个请求超时（秒），覆盖一个分片的完整发送
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 会话过期后最多重建次数
    #[serde(default = "default_max_session_restarts")]
    pub max_session_restarts: u32,
    /// 上传接口基础地址
    #[serde(default = "default_upload_base_url")]
    pub upload_base_url: String,
    /// 数据接口基础地址（频道信息、视频分类）
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_chunk_size() -> u64 {
    DEFAULT_UPLOAD_CHUNK_SIZE
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_max_session_restarts() -> u32 {
    3
}

fn default_upload_base_url() -> String {
    "https://www.googleapis.com/upload".to_string()
}

fn default_api_base_url() -> String {
    "https://www.googleapis.com".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_file_size: default_max_file_size(),
            bandwidth_limit: 0,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_session_restarts: default_max_session_restarts(),
            upload_base_url: default_upload_base_url(),
            api_base_url: default_api_base_url(),
        }
    }
}

/// 重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 单个分片最多尝试次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 初始退避延迟（毫秒）
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// 退避倍数
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// 最大退避延迟（毫秒）
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    1.5
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let mut config: AppConfig =
            toml::from_str(&content).context("Failed to parse config file")?;
        config.apply_env_overrides();
        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 仅在文件不存在时写入默认配置，避免覆盖用户写错的文件
                if !Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {}", e);
                    }
                }

                let mut config = default_config;
                config.apply_env_overrides();
                config
            }
        }
    }

    /// 使用环境变量覆盖敏感字段
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("YOUTUBE_CLIENT_ID").filter(|v| !v.is_empty()) {
            self.oauth.client_id = id;
        }
        if let Some(secret) = lookup("YOUTUBE_CLIENT_SECRET").filter(|v| !v.is_empty()) {
            self.oauth.client_secret = secret;
        }
        if let Some(port) = lookup("OAUTH_PORT").and_then(|v| v.parse::<u16>().ok()) {
            self.server.port = port;
            self.oauth.redirect_uri = format!("http://localhost:{}/oauth2callback", port);
        }
    }

    /// 校验数值配置
    pub fn validate(&self) -> Result<()> {
        let chunk = self.upload.chunk_size;
        if chunk == 0 || chunk % CHUNK_GRANULARITY != 0 {
            anyhow::bail!(
                "upload.chunk_size 必须是 {} 的正整数倍，当前值: {}",
                CHUNK_GRANULARITY,
                chunk
            );
        }
        if self.upload.max_file_size == 0 {
            anyhow::bail!("upload.max_file_size 不能为 0");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts 不能为 0");
        }
        if !(self.retry.backoff_factor >= 1.0) {
            anyhow::bail!(
                "retry.backoff_factor 不能小于 1.0，当前值: {}",
                self.retry.backoff_factor
            );
        }
        Ok(())
    }
}
