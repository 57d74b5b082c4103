use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ChatError, ChatResult};
use crate::types::{ClientUser, StaffIdentity};

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn unauthorized() -> ChatError {
    ChatError::Unauthorized("Unauthorized".into())
}

/// Issues a staff token for `username`: `<username>.<hex hmac>`.
pub fn sign_staff_token(admin_token: &str, username: &str) -> Option<String> {
    let username = username.trim();
    if admin_token.is_empty() || username.is_empty() {
        return None;
    }
    let mut mac = Hmac::<Sha256>::new_from_slice(admin_token.as_bytes()).ok()?;
    mac.update(username.as_bytes());
    Some(format!("{username}.{}", hex::encode(mac.finalize().into_bytes())))
}

fn verify_staff_token(admin_token: &str, token: &str) -> Option<String> {
    let (username, signature) = token.rsplit_once('.')?;
    let username = username.trim();
    if username.is_empty() {
        return None;
    }
    let signature = hex::decode(signature.trim()).ok()?;
    let mut mac = Hmac::<Sha256>::new_from_slice(admin_token.as_bytes()).ok()?;
    mac.update(username.as_bytes());
    mac.verify_slice(&signature).ok()?;
    Some(username.to_string())
}

/// Staff access: the shared admin token itself, or a token signed with it.
/// With no admin token configured every staff request is rejected.
#[derive(Debug, Clone)]
pub struct StaffAuth {
    admin_token: Option<String>,
    admin_username: String,
}

impl StaffAuth {
    pub fn new(admin_token: Option<String>, admin_username: impl Into<String>) -> Self {
        Self {
            admin_token: admin_token.filter(|t| !t.trim().is_empty()),
            admin_username: admin_username.into(),
        }
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> ChatResult<StaffIdentity> {
        let token = bearer_token(headers).ok_or_else(unauthorized)?;
        let Some(admin_token) = self.admin_token.as_deref() else {
            tracing::warn!("staff request rejected: ADMIN_TOKEN is not configured");
            return Err(unauthorized());
        };
        if token == admin_token {
            return Ok(StaffIdentity {
                label: self.admin_username.clone(),
            });
        }
        verify_staff_token(admin_token, &token)
            .map(|label| StaffIdentity { label })
            .ok_or_else(unauthorized)
    }
}

#[async_trait]
pub trait ClientAuthenticator: Send + Sync {
    /// `Ok(None)` means the token was understood and rejected.
    async fn resolve(&self, token: &str) -> ChatResult<Option<ClientUser>>;
}

/// Resolves client tokens against a Supabase-style `GET /auth/v1/user`.
pub struct HttpClientAuthenticator {
    client: reqwest::Client,
    auth_url: String,
    api_key: Option<String>,
}

impl HttpClientAuthenticator {
    pub fn new(client: reqwest::Client, auth_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            auth_url: auth_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl ClientAuthenticator for HttpClientAuthenticator {
    async fn resolve(&self, token: &str) -> ChatResult<Option<ClientUser>> {
        let mut request = self
            .client
            .get(format!("{}/auth/v1/user", self.auth_url))
            .bearer_auth(token);
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key);
        }
        let response = request.send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ChatError::upstream(format!(
                "client auth endpoint returned {status}"
            )));
        }

        let user = response.json::<ClientUser>().await?;
        if user.id.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(user))
    }
}

/// Used when no auth endpoint is configured: no client token is valid.
pub struct DisabledClientAuthenticator;

#[async_trait]
impl ClientAuthenticator for DisabledClientAuthenticator {
    async fn resolve(&self, _token: &str) -> ChatResult<Option<ClientUser>> {
        Ok(None)
    }
}

pub async fn authenticate_client(
    authenticator: &dyn ClientAuthenticator,
    headers: &HeaderMap,
) -> ChatResult<ClientUser> {
    let token = bearer_token(headers).ok_or_else(unauthorized)?;
    authenticator
        .resolve(&token)
        .await?
        .ok_or_else(|| ChatError::Unauthorized("Invalid user token".into()))
}
