//! Live-connect endpoint constants and URL helpers.

use url::Url;

use crate::core::transport::{TransportError, TransportResult};

/// Bidirectional streaming endpoint that accepts ephemeral access tokens.
pub const LIVE_DEFAULT_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContentConstrained";

/// Native-audio dialog model.
pub const LIVE_DEFAULT_MODEL: &str = "models/gemini-2.5-flash-preview-native-audio-dialog";

/// Prebuilt voice used when the session config names none.
pub const LIVE_DEFAULT_VOICE: &str = "Zephyr";

/// Microphone audio is PCM16 mono at this rate.
pub const LIVE_INPUT_SAMPLE_RATE: u32 = 16000;

/// Model names must carry the `models/` resource prefix.
pub fn normalize_model(model: &str) -> String {
    if model.is_empty() {
        LIVE_DEFAULT_MODEL.to_string()
    } else if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

/// Append the access token as a query parameter.
///
/// Any existing query parameters on `endpoint` are preserved.
pub fn build_live_url(endpoint: &str, access_token: &str) -> TransportResult<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| TransportError::Connection(format!("invalid live endpoint: {e}")))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(TransportError::Connection(format!(
                "live endpoint must use ws or wss, got '{other}'"
            )));
        }
    }

    url.query_pairs_mut()
        .append_pair("access_token", access_token);
    Ok(url)
}
