// 应用状态

use crate::auth::{AuthorizationClient, CredentialManager, CredentialStore, OAuthClient};
use crate::config::AppConfig;
use crate::uploader::{UploadCoordinator, UploadManager, UploadTransport, YouTubeTransport};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

/// 应用全局状态
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Arc<AppConfig>,
    /// 凭证生命周期管理器
    pub credentials: Arc<CredentialManager>,
    /// 上传协调器
    pub coordinator: Arc<UploadCoordinator>,
    /// 后台上传任务
    pub upload_manager: Arc<UploadManager>,
}

impl AppState {
    /// 使用真实的 OAuth 客户端和上传传输层创建应用状态
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let oauth = OAuthClient::new(config.oauth.clone()).context("创建 OAuth 客户端失败")?;
        let transport = YouTubeTransport::new(&config.upload).context("创建上传传输层失败")?;
        Ok(Self::with_components(
            config,
            Arc::new(oauth),
            Arc::new(transport),
        ))
    }

    /// 组装应用状态（授权服务器与传输层可替换）
    pub fn with_components(
        config: AppConfig,
        oauth: Arc<dyn AuthorizationClient>,
        transport: Arc<dyn UploadTransport>,
    ) -> Self {
        let store = CredentialStore::from_config(&config.oauth);
        info!("凭证存储: {:?}", store.token_path());

        let credentials = Arc::new(CredentialManager::new(store, oauth, config.oauth.clone()));
        let coordinator = Arc::new(UploadCoordinator::new(
            credentials.clone(),
            transport,
            config.upload.clone(),
            &config.retry,
        ));
        let upload_manager = Arc::new(UploadManager::new(coordinator.clone()));

        Self {
            config: Arc::new(config),
            credentials,
            coordinator,
            upload_manager,
        }
    }

    /// 进程退出前调用
    pub fn shutdown(&self) {
        let active = self.upload_manager.active_task_count();
        if active > 0 {
            info!("取消 {} 个进行中的上传任务", active);
        }
        self.upload_manager.shutdown();
    }
}
