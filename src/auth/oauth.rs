// OAuth 2.0 令牌端点客户端
//
// 只负责两类交换：授权码 → 首个凭证，refresh_token → 新 access_token

use crate::auth::{CredentialError, TokenResponse};
use crate::config::OAuthConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};

/// 授权服务器
#[async_trait]
pub trait AuthorizationClient: Send + Sync {
    /// 用一次性授权码换取首个凭证
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, CredentialError>;

    /// 用 refresh_token 换取新的 access_token
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, CredentialError>;
}

/// 令牌端点错误响应
#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// 基于 reqwest 的 OAuth 客户端
#[derive(Debug, Clone)]
pub struct OAuthClient {
    client: Client,
    config: OAuthConfig,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig) -> Result<Self, CredentialError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CredentialError::Exchange {
                status: None,
                message: format!("创建 HTTP 客户端失败: {}", e),
            })?;

        info!("初始化 OAuth 客户端: token_uri={}", config.token_uri);
        Ok(Self { client, config })
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, CredentialError> {
        let response = self
            .client
            .post(&self.config.token_uri)
            .form(form)
            .send()
            .await
            .map_err(|e| CredentialError::Exchange {
                status: None,
                message: format!("令牌请求发送失败: {}", e),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| CredentialError::Exchange {
            status: Some(status.as_u16()),
            message: format!("读取令牌响应失败: {}", e),
        })?;

        if !status.is_success() {
            let message = match serde_json::from_str::<TokenErrorBody>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {}", err.error, desc),
                    None => err.error,
                },
                Err(_) => body,
            };
            error!("令牌端点返回错误: status={}, {}", status, message);
            return Err(CredentialError::Exchange {
                status: Some(status.as_u16()),
                message,
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| CredentialError::Exchange {
                status: Some(status.as_u16()),
                message: format!("解析令牌响应失败: {}", e),
            })?;
        debug!("令牌交换成功: {:?}", token);
        Ok(token)
    }
}

#[async_trait]
impl AuthorizationClient for OAuthClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, CredentialError> {
        info!("使用授权码交换凭证");
        self.post_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, CredentialError> {
        info!("刷新 access_token");
        self.post_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ])
        .await
    }
}

/// 生成用户授权页地址
///
/// 申请离线访问并强制显示同意页，确保返回 refresh_token
pub fn authorization_url(config: &OAuthConfig, state: Option<&str>) -> String {
    let scopes = config.scopes.join(" ");
    let mut url = format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}\
         &access_type=offline&include_granted_scopes=true&prompt=consent",
        config.auth_uri,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(&config.redirect_uri),
        urlencoding::encode(&scopes),
    );
    if let Some(state) = state {
        url.push_str("&state=");
        url.push_str(&urlencoding::encode(state));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_url() {
        let config = OAuthConfig {
            client_id: "abc.apps.googleusercontent.com".to_string(),
            ..OAuthConfig::default()
        };

        let url = authorization_url(&config, Some("xyz"));
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?response_type=code"));
        assert!(url.contains("client_id=abc.apps.googleusercontent.com"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains(
            "redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Foauth2callback"
        ));
        assert!(url.contains("youtube.upload"));
        assert!(url.ends_with("&state=xyz"));
    }

    #[test]
    fn test_error_body_parsing() {
        let body: TokenErrorBody = serde_json::from_str(
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        )
        .unwrap();
        assert_eq!(body.error, "invalid_grant");
        assert!(body.error_description.unwrap().contains("revoked"));
    }
}
