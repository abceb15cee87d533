// 认证模块
//
// - store: 加密凭证存储
// - oauth: 令牌端点客户端
// - manager: 凭证生命周期（缓存、提前刷新、串行化刷新）

pub mod error;
pub mod manager;
pub mod oauth;
pub mod store;
pub mod types;

pub use error::CredentialError;
pub use manager::{AccessTokenSource, CredentialManager};
pub use oauth::{authorization_url, AuthorizationClient, OAuthClient};
pub use store::CredentialStore;
pub use types::{
    Credential, CredentialStatus, TokenResponse, SCOPE_YOUTUBE, SCOPE_YOUTUBE_UPLOAD,
};
