//! Ephemeral session credentials.
//!
//! A [`CredentialBroker`] issues a short-lived token per session. The HTTP
//! broker POSTs to a credential endpoint and accepts the token under any of
//! the field shapes the vendors use:
//!
//! - `{"token": "..."}`
//! - `{"client_secret": {"value": "..."}}`
//! - `{"client_secret": "..."}`
//! - `{"value": "..."}`

use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Errors raised while fetching a credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The request could not be sent or the body could not be read
    #[error("Credential request failed: {0}")]
    Request(String),

    /// The endpoint answered with something other than 200
    #[error("Credential endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The body was not JSON or carried no token
    #[error("Malformed credential response: {0}")]
    Malformed(String),
}

/// Short-lived token used once to authenticate a handshake.
///
/// The secret is wiped from memory on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Issues ephemeral credentials on demand.
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    async fn fetch(&self) -> Result<Credential, CredentialError>;
}

/// Pull the token out of a credential endpoint response body.
pub fn extract_token(body: &serde_json::Value) -> Option<String> {
    let candidates = [
        body.get("token"),
        body.pointer("/client_secret/value"),
        body.get("client_secret"),
        body.get("value"),
    ];

    candidates
        .into_iter()
        .flatten()
        .find_map(|value| value.as_str().filter(|token| !token.is_empty()))
        .map(str::to_string)
}

/// Broker backed by an HTTP credential endpoint.
#[derive(Clone)]
pub struct HttpCredentialBroker {
    http_client: Client,
    endpoint: String,
    /// Bearer token presented to the credential endpoint itself
    auth_token: Option<Credential>,
}

impl fmt::Debug for HttpCredentialBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCredentialBroker")
            .field("endpoint", &self.endpoint)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpCredentialBroker {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(Client::new(), endpoint)
    }

    /// Reuse an existing client (connection pooling).
    pub fn with_client(http_client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
            auth_token: None,
        }
    }

    /// Authenticate requests to the credential endpoint with a bearer token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(Credential::new(token));
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialBroker for HttpCredentialBroker {
    async fn fetch(&self) -> Result<Credential, CredentialError> {
        tracing::debug!("Requesting session credential from {}", self.endpoint);

        let mut request = self
            .http_client
            .post(&self.endpoint)
            .header(http::header::CACHE_CONTROL, "no-store");
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token.expose());
        }

        let response = request
            .send()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CredentialError::Request(format!("Failed to read response: {e}")))?;

        if status.as_u16() != 200 {
            return Err(CredentialError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| CredentialError::Malformed(format!("invalid JSON: {e}")))?;

        let token = extract_token(&json)
            .ok_or_else(|| CredentialError::Malformed("no token field in response".to_string()))?;

        tracing::info!("Obtained ephemeral session credential");
        Ok(Credential::new(token))
    }
}
