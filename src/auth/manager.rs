// 凭证生命周期管理
//
// 内存凭证由一把 tokio Mutex 保护，"检查是否过期 + 刷新 + 落盘" 在持锁期间完成：
// 并发的 acquire 会排队，后到者直接拿到前者刷新后的结果，
// 同一凭证永远不会同时发出两个刷新请求。

use crate::auth::{
    authorization_url, AuthorizationClient, Credential, CredentialError, CredentialStatus,
    CredentialStore,
};
use crate::config::OAuthConfig;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// 为上传会话提供 access_token
///
/// 每次请求前调用，凭证在会话进行中被刷新时自动拿到新值
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, CredentialError>;
}

/// 凭证生命周期管理器
pub struct CredentialManager {
    store: CredentialStore,
    client: Arc<dyn AuthorizationClient>,
    config: OAuthConfig,
    /// 过期判断的安全余量
    margin: Duration,
    /// 内存中的凭证（None 表示尚未从磁盘加载或已撤销）
    current: Mutex<Option<Credential>>,
    /// 已完成的刷新次数
    refresh_count: AtomicU64,
}

impl CredentialManager {
    pub fn new(
        store: CredentialStore,
        client: Arc<dyn AuthorizationClient>,
        config: OAuthConfig,
    ) -> Self {
        let margin = Duration::seconds(config.refresh_margin_secs.min(i64::MAX as u64) as i64);
        Self {
            store,
            client,
            config,
            margin,
            current: Mutex::new(None),
            refresh_count: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// 已完成的刷新次数
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// 用户授权页地址
    pub fn authorization_url(&self, state: Option<&str>) -> String {
        authorization_url(&self.config, state)
    }

    /// 获取一个未过期的凭证
    ///
    /// 过期时最多尝试一次刷新；刷新失败返回 `AuthRequired`，由调用方决定是否重新授权
    pub async fn acquire(&self) -> Result<Credential, CredentialError> {
        let mut current = self.current.lock().await;

        let credential = match current.clone() {
            Some(credential) => credential,
            None => {
                let loaded = match self.load_stored().await {
                    Ok(credential) => credential,
                    Err(CredentialError::NotFound) => {
                        return Err(CredentialError::AuthRequired(
                            "本地没有已保存的凭证".to_string(),
                        ))
                    }
                    Err(e) => return Err(e),
                };
                *current = Some(loaded.clone());
                loaded
            }
        };

        if !credential.is_expired(self.margin, Utc::now()) {
            return Ok(credential);
        }

        let refresh_token = match credential.refresh_token.as_deref() {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => {
                warn!("凭证已过期且没有 refresh_token");
                return Err(CredentialError::AuthRequired(
                    "凭证已过期且无法刷新".to_string(),
                ));
            }
        };

        info!("凭证即将过期 (expires_at={:?})，开始刷新", credential.expires_at);
        let response = match self.client.refresh(&refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                warn!("凭证刷新失败: {}", e);
                return Err(CredentialError::AuthRequired(format!("凭证刷新失败: {}", e)));
            }
        };

        let mut refreshed = credential;
        if let Err(e) = refreshed.apply_refresh(response, Utc::now()) {
            warn!("刷新响应无效: {}", e);
            return Err(CredentialError::AuthRequired(format!("凭证刷新失败: {}", e)));
        }
        self.refresh_count.fetch_add(1, Ordering::SeqCst);

        // 先更新内存，落盘失败时仍然上报
        *current = Some(refreshed.clone());
        self.persist(&refreshed).await?;

        info!("✓ 凭证刷新成功，新过期时间: {:?}", refreshed.expires_at);
        Ok(refreshed)
    }

    /// 用授权码换取首个凭证并保存
    pub async fn bootstrap(&self, authorization_code: &str) -> Result<Credential, CredentialError> {
        let code = authorization_code.trim();
        if code.is_empty() {
            return Err(CredentialError::Exchange {
                status: None,
                message: "授权码为空".to_string(),
            });
        }

        let mut current = self.current.lock().await;
        let response = self.client.exchange_code(code).await?;
        let credential = Credential::from_token_response(
            response,
            &self.config.client_id,
            &self.config.token_uri,
            &self.config.scopes,
            Utc::now(),
        )?;
        if !credential.can_refresh() {
            warn!("授权响应中没有 refresh_token，凭证过期后需要重新授权");
        }

        self.persist(&credential).await?;
        *current = Some(credential.clone());

        info!("✓ 授权成功，凭证已保存");
        Ok(credential)
    }

    /// 撤销本地凭证
    pub async fn revoke(&self) -> Result<(), CredentialError> {
        let mut current = self.current.lock().await;
        *current = None;
        let store = self.store.clone();
        self.blocking(move || store.clear(false)).await?;
        info!("本地凭证已撤销");
        Ok(())
    }

    /// 查询认证状态（不触发刷新）
    ///
    /// 刷新进行中时不等待，直接读取磁盘上的凭证
    pub async fn status(&self) -> CredentialStatus {
        let cached = match self.current.try_lock() {
            Ok(current) => current.clone(),
            Err(_) => None,
        };
        let credential = match cached {
            Some(credential) => Some(credential),
            None => self.load_stored().await.ok(),
        };

        let stored = self.store.exists();
        match credential {
            Some(credential) => CredentialStatus {
                stored,
                valid: !credential.is_expired(self.margin, Utc::now()),
                refreshable: credential.can_refresh(),
                expires_at: credential.expires_at,
                scopes: credential.scopes,
            },
            None => CredentialStatus {
                stored,
                valid: false,
                refreshable: false,
                expires_at: None,
                scopes: Vec::new(),
            },
        }
    }

    async fn load_stored(&self) -> Result<Credential, CredentialError> {
        let store = self.store.clone();
        self.blocking(move || store.get()).await
    }

    async fn persist(&self, credential: &Credential) -> Result<(), CredentialError> {
        let store = self.store.clone();
        let credential = credential.clone();
        self.blocking(move || store.put(&credential)).await
    }

    /// 文件读写和加解密放到阻塞线程池执行
    async fn blocking<T, F>(&self, f: F) -> Result<T, CredentialError>
    where
        F: FnOnce() -> Result<T, CredentialError> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| CredentialError::storage(self.store.token_path(), e))?
    }
}

#[async_trait]
impl AccessTokenSource for CredentialManager {
    async fn access_token(&self) -> Result<String, CredentialError> {
        self.acquire().await.map(|c| c.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenResponse;
    use std::sync::atomic::AtomicUsize;

    /// 记录调用次数的授权服务器
    struct FakeAuthServer {
        refresh_calls: AtomicUsize,
        fail_refresh: bool,
        refresh_delay: std::time::Duration,
        expires_in: i64,
    }

    impl FakeAuthServer {
        fn new(fail_refresh: bool) -> Arc<Self> {
            Arc::new(Self {
                refresh_calls: AtomicUsize::new(0),
                fail_refresh,
                refresh_delay: std::time::Duration::from_millis(20),
                expires_in: 3600,
            })
        }

        fn slow(refresh_delay: std::time::Duration) -> Arc<Self> {
            Arc::new(Self {
                refresh_calls: AtomicUsize::new(0),
                fail_refresh: false,
                refresh_delay,
                expires_in: 3600,
            })
        }

        fn with_expires_in(expires_in: i64) -> Arc<Self> {
            Arc::new(Self {
                refresh_calls: AtomicUsize::new(0),
                fail_refresh: false,
                refresh_delay: std::time::Duration::from_millis(20),
                expires_in,
            })
        }
    }

    #[async_trait]
    impl AuthorizationClient for FakeAuthServer {
        async fn exchange_code(&self, code: &str) -> Result<TokenResponse, CredentialError> {
            if code != "good-code" {
                return Err(CredentialError::Exchange {
                    status: Some(400),
                    message: "invalid_grant".to_string(),
                });
            }
            Ok(TokenResponse {
                access_token: "access-1".to_string(),
                expires_in: Some(self.expires_in),
                refresh_token: Some("refresh-1".to_string()),
                scope: None,
                token_type: None,
            })
        }

        async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, CredentialError> {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.refresh_delay).await;
            if self.fail_refresh {
                return Err(CredentialError::Exchange {
                    status: Some(400),
                    message: "invalid_grant".to_string(),
                });
            }
            assert_eq!(refresh_token, "refresh-1");
            Ok(TokenResponse {
                access_token: format!("access-refreshed-{}", n),
                expires_in: Some(self.expires_in),
                refresh_token: None,
                scope: None,
                token_type: None,
            })
        }
    }

    fn manager(dir: &std::path::Path, server: Arc<FakeAuthServer>) -> CredentialManager {
        let config = OAuthConfig {
            client_id: "client".to_string(),
            token_dir: dir.to_path_buf(),
            ..OAuthConfig::default()
        };
        CredentialManager::new(CredentialStore::from_config(&config), server, config)
    }

    fn expired_credential(refresh: Option<&str>) -> Credential {
        Credential {
            access_token: "stale".to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at: Some(Utc::now() - Duration::minutes(5)),
            scopes: vec![],
            client_id: "client".to_string(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
        }
    }

    #[tokio::test]
    async fn test_acquire_without_stored_credential() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), FakeAuthServer::new(false));
        assert!(matches!(
            m.acquire().await,
            Err(CredentialError::AuthRequired(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_then_acquire_uses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let server = FakeAuthServer::new(false);
        let m = manager(dir.path(), server.clone());

        let cred = m.bootstrap("good-code").await.unwrap();
        assert_eq!(cred.access_token, "access-1");
        assert!(m.store().exists());

        let again = m.acquire().await.unwrap();
        assert_eq!(again, cred);
        assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_bad_code() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), FakeAuthServer::new(false));
        assert!(matches!(
            m.bootstrap("wrong").await,
            Err(CredentialError::Exchange { .. })
        ));
        assert!(!m.store().exists());
    }

    #[tokio::test]
    async fn test_expired_credential_is_refreshed_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let server = FakeAuthServer::new(false);
        let m = manager(dir.path(), server.clone());
        m.store().put(&expired_credential(Some("refresh-1"))).unwrap();

        let cred = m.acquire().await.unwrap();
        assert_eq!(cred.access_token, "access-refreshed-1");
        assert_eq!(cred.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(m.refresh_count(), 1);

        let on_disk = m.store().get().unwrap();
        assert_eq!(on_disk.access_token, "access-refreshed-1");
    }

    #[tokio::test]
    async fn test_refresh_failure_is_auth_required_and_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let server = FakeAuthServer::new(true);
        let m = manager(dir.path(), server.clone());
        m.store().put(&expired_credential(Some("refresh-1"))).unwrap();

        assert!(matches!(
            m.acquire().await,
            Err(CredentialError::AuthRequired(_))
        ));
        assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let server = FakeAuthServer::new(false);
        let m = manager(dir.path(), server.clone());
        m.store().put(&expired_credential(None)).unwrap();

        assert!(matches!(
            m.acquire().await,
            Err(CredentialError::AuthRequired(_))
        ));
        assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_refreshes_once() {
        let dir = tempfile::tempdir().unwrap();
        let server = FakeAuthServer::new(false);
        let m = Arc::new(manager(dir.path(), server.clone()));
        m.store().put(&expired_credential(Some("refresh-1"))).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = m.clone();
                tokio::spawn(async move { m.acquire().await })
            })
            .collect();

        for handle in handles {
            let cred = handle.await.unwrap().unwrap();
            assert_eq!(cred.access_token, "access-refreshed-1");
        }
        assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_corrupt_store_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), FakeAuthServer::new(false));
        std::fs::write(m.store().token_path(), "not-a-credential").unwrap();

        assert!(matches!(
            m.acquire().await,
            Err(CredentialError::CorruptData(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke_clears_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), FakeAuthServer::new(false));
        m.bootstrap("good-code").await.unwrap();

        m.revoke().await.unwrap();
        assert!(!m.store().exists());
        assert!(matches!(
            m.acquire().await,
            Err(CredentialError::AuthRequired(_))
        ));

        let status = m.status().await;
        assert!(!status.stored);
        assert!(!status.valid);
    }

    #[tokio::test]
    async fn test_status_does_not_wait_for_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let server = FakeAuthServer::slow(std::time::Duration::from_millis(500));
        let m = Arc::new(manager(dir.path(), server.clone()));
        m.store().put(&expired_credential(Some("refresh-1"))).unwrap();

        let refreshing = {
            let m = m.clone();
            tokio::spawn(async move { m.acquire().await })
        };
        while server.refresh_calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        // 刷新持锁期间，状态查询读取磁盘上的旧凭证
        let status = tokio::time::timeout(std::time::Duration::from_millis(200), m.status())
            .await
            .expect("status blocked behind refresh");
        assert!(status.stored);
        assert!(!status.valid);
        assert!(status.refreshable);

        let cred = refreshing.await.unwrap().unwrap();
        assert_eq!(cred.access_token, "access-refreshed-1");
        assert!(m.status().await.valid);
    }

    #[tokio::test]
    async fn test_out_of_range_expiry_from_server() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), FakeAuthServer::with_expires_in(i64::MAX));
        assert!(matches!(
            m.bootstrap("good-code").await,
            Err(CredentialError::Exchange { .. })
        ));
        assert!(!m.store().exists());

        // 刷新响应同样无效时按刷新失败处理，磁盘上的凭证不被覆盖
        m.store().put(&expired_credential(Some("refresh-1"))).unwrap();
        assert!(matches!(
            m.acquire().await,
            Err(CredentialError::AuthRequired(_))
        ));
        assert_eq!(m.store().get().unwrap().access_token, "stale");
        assert_eq!(m.refresh_count(), 0);
    }
}
