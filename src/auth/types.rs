// 认证模块数据类型定义

use crate::auth::CredentialError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 上传视频权限
pub const SCOPE_YOUTUBE_UPLOAD: &str = "https://www.googleapis.com/auth/youtube.upload";

/// 读写权限（设置缩略图需要）
pub const SCOPE_YOUTUBE: &str = "https://www.googleapis.com/auth/youtube";

/// 授权凭证
///
/// 刷新时只替换 access_token 和过期时间，refresh_token 一旦获得就一直保留
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    /// 没有 refresh_token 的凭证过期后无法自愈
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// 过期时间，None 表示服务器未给出
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// 签发凭证的客户端 ID
    pub client_id: String,
    /// 刷新用的令牌端点
    pub token_uri: String,
}

// 不打印令牌内容
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &format!("<{} bytes>", self.access_token.len()))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl Credential {
    /// 由首次授权码交换的响应创建凭证
    pub fn from_token_response(
        response: TokenResponse,
        client_id: &str,
        token_uri: &str,
        requested_scopes: &[String],
        now: DateTime<Utc>,
    ) -> Result<Self, CredentialError> {
        let expires_at = response.expires_at(now)?;
        let scopes = response
            .scope_list()
            .unwrap_or_else(|| requested_scopes.to_vec());
        Ok(Self {
            expires_at,
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            scopes,
            client_id: client_id.to_string(),
            token_uri: token_uri.to_string(),
        })
    }

    /// 在安全余量内是否已过期
    pub fn is_expired(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + margin >= expires_at,
            None => false,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// 应用刷新结果（响应无效时凭证保持不变）
    pub fn apply_refresh(
        &mut self,
        response: TokenResponse,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        let expires_at = response.expires_at(now)?;
        if let Some(scopes) = response.scope_list() {
            self.scopes = scopes;
        }
        self.access_token = response.access_token;
        self.expires_at = expires_at;
        // 授权服务器通常不会在刷新时重新下发 refresh_token
        if let Some(refresh_token) = response.refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = Some(refresh_token);
        }
        Ok(())
    }
}

/// 令牌端点响应
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// 有效期（秒）
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// 空格分隔的权限列表
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenResponse {
    /// 由 `expires_in` 计算过期时间，超出时间范围的值视为无效响应
    pub fn expires_at(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CredentialError> {
        let Some(secs) = self.expires_in else {
            return Ok(None);
        };
        Duration::try_seconds(secs)
            .and_then(|d| now.checked_add_signed(d))
            .map(Some)
            .ok_or_else(|| CredentialError::Exchange {
                status: None,
                message: format!("令牌有效期超出范围: expires_in={}", secs),
            })
    }

    fn scope_list(&self) -> Option<Vec<String>> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|v| !v.is_empty())
    }
}

/// 认证状态（不触发刷新）
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    /// 本地是否存有凭证
    pub stored: bool,
    /// 当前 access_token 是否仍有效
    pub valid: bool,
    /// 过期后能否自动刷新
    pub refreshable: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}
