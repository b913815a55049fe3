//! SDP offer/answer exchange with the realtime endpoint.
//!
//! The local offer is POSTed as `application/sdp` with the session credential
//! as a bearer token. A `401` usually means the ephemeral credential expired
//! between issue and use, so exactly one replacement credential is fetched and
//! the POST retried once.

use std::sync::Arc;

use http::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use url::Url;

use crate::core::credentials::{Credential, CredentialBroker};
use crate::core::transport::{TransportError, TransportResult};

/// Realtime endpoint accepting SDP offers.
pub const DEFAULT_NEGOTIATION_URL: &str = "https://api.openai.com/v1/realtime";

/// Model used when the session config names none.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-realtime";

const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Raw answer from the negotiation endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl NegotiationResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn looks_like_sdp(&self) -> bool {
        self.content_type.contains(SDP_CONTENT_TYPE) || self.body.trim().starts_with("v=")
    }

    /// Best description of a failure: the JSON `error.message` if present, else the body.
    fn error_message(&self) -> String {
        serde_json::from_str::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|json| {
                json.pointer("/error/message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| self.body.clone())
    }
}

/// Accept a response only if it is 2xx and carries an SDP answer.
pub fn validate_answer(response: NegotiationResponse) -> TransportResult<String> {
    if !response.is_success() {
        return Err(TransportError::Negotiation(format!(
            "endpoint returned {}: {}",
            response.status,
            response.error_message()
        )));
    }

    if !response.looks_like_sdp() {
        return Err(TransportError::Negotiation(format!(
            "endpoint returned {} without an SDP answer: {}",
            response.status,
            response.error_message()
        )));
    }

    Ok(response.body)
}

/// Performs the offer/answer POST, including the single 401 retry.
#[derive(Clone)]
pub struct SdpNegotiator {
    http_client: Client,
    endpoint: String,
    model: String,
    broker: Arc<dyn CredentialBroker>,
}

impl SdpNegotiator {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        broker: Arc<dyn CredentialBroker>,
    ) -> Self {
        Self::with_client(Client::new(), endpoint, model, broker)
    }

    pub fn with_client(
        http_client: Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        broker: Arc<dyn CredentialBroker>,
    ) -> Self {
        let model = model.into();
        Self {
            http_client,
            endpoint: endpoint.into(),
            model: if model.is_empty() {
                DEFAULT_REALTIME_MODEL.to_string()
            } else {
                model
            },
            broker,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// `<endpoint>?model=<model>`
    pub fn negotiation_url(&self) -> TransportResult<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| TransportError::Negotiation(format!("invalid endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("model", &self.model);
        Ok(url)
    }

    /// Exchange `offer_sdp` for the remote answer.
    pub async fn negotiate(
        &self,
        offer_sdp: &str,
        credential: &Credential,
    ) -> TransportResult<String> {
        let url = self.negotiation_url()?;

        let mut response = self.post_offer(&url, offer_sdp, credential).await?;

        if response.status == 401 {
            tracing::warn!("Negotiation rejected credential (401); fetching a fresh one and retrying once");
            let fresh = self.broker.fetch().await?;
            response = self.post_offer(&url, offer_sdp, &fresh).await?;

            if response.status == 401 {
                return Err(TransportError::Unauthorized(response.error_message()));
            }
        }

        let answer = validate_answer(response)?;
        tracing::info!("SDP negotiation succeeded ({} bytes)", answer.len());
        Ok(answer)
    }

    async fn post_offer(
        &self,
        url: &Url,
        offer_sdp: &str,
        credential: &Credential,
    ) -> TransportResult<NegotiationResponse> {
        tracing::debug!("Posting SDP offer to {}", self.endpoint);

        let response = self
            .http_client
            .post(url.clone())
            .header(AUTHORIZATION, format!("Bearer {}", credential.expose()))
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .header("OpenAI-Beta", "realtime=v1")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| TransportError::Negotiation(format!("request failed: {e}")))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Negotiation(format!("failed to read answer: {e}")))?;

        Ok(NegotiationResponse {
            status,
            content_type,
            body,
        })
    }
}

impl std::fmt::Debug for SdpNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdpNegotiator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}
