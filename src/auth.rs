//! Token endpoint client.
//!
//! DESIGN
//! ======
//! The hosted transport authorizes channels with short-lived capability
//! tokens issued by an HTTP endpoint:
//! `GET {base}/api/token?clientId=…&sessionid=…` returns a grant scoped to
//! `subscribe/publish/presence` on that session's channel. Any failure here
//! is an authorization fault — the call site starts the client in offline
//! (self-leader) mode rather than surfacing an error.

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("TOKEN_ENDPOINT_URL not set")]
    NotConfigured,
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint rejected the request with status {0}")]
    Rejected(u16),
}

/// A capability grant for one session channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub token: String,
    pub key_name: String,
    /// Issue time, milliseconds since Unix epoch.
    pub issued: i64,
    /// Expiry time, milliseconds since Unix epoch.
    pub expires: i64,
    /// Serialized capability map, e.g. `{"<session>":["subscribe","publish","presence"]}`.
    pub capability: String,
}

#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    base_url: String,
}

impl TokenClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }

    /// Build a client from `TOKEN_ENDPOINT_URL`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotConfigured`] when the variable is absent.
    pub fn from_env() -> Result<Self, AuthError> {
        let base_url = std::env::var("TOKEN_ENDPOINT_URL").map_err(|_| AuthError::NotConfigured)?;
        Ok(Self::new(base_url))
    }

    /// Request a token scoped to `session_id` for `client_id`.
    ///
    /// # Errors
    ///
    /// Returns an error for transport failures, non-success statuses, and
    /// malformed grant bodies.
    pub async fn request_token(&self, session_id: &str, client_id: &str) -> Result<TokenGrant, AuthError> {
        let url = format!("{}/api/token", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(url)
            .query(&[("clientId", client_id), ("sessionid", session_id)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected(status.as_u16()));
        }

        Ok(response.json::<TokenGrant>().await?)
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
