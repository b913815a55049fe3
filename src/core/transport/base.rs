//! Base traits and types for session transports.
//!
//! A transport strategy negotiates the duplex link to the remote endpoint and
//! returns a [`ChannelHandle`] for outbound traffic. Inbound traffic is
//! reported as [`Event`]s through the [`EventSink`] given to
//! [`TransportChannel::open`].
//!
//! # Supported Strategies
//!
//! - Native live-connect: one WebSocket carrying JSON control and base64 audio
//! - Negotiated peer transport: SDP offer/answer, media on RTP tracks and
//!   control on a data channel

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::credentials::{Credential, CredentialError};
use crate::core::events::Event;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while opening or using a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The handshake endpoint rejected the offer or returned an unusable body
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// The handshake endpoint answered 401
    #[error("Negotiation unauthorized: {0}")]
    Unauthorized(String),

    /// Local media capture failed
    #[error("Device error: {0}")]
    Device(String),

    /// The link could not be established
    #[error("Connection failed: {0}")]
    Connection(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Message could not be encoded or decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// The channel is torn down or tearing down
    #[error("Channel closed")]
    Closed,

    /// The strategy cannot perform this operation
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Fetching a replacement credential failed
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Transport Kind
// =============================================================================

/// Which negotiation strategy a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportKind {
    /// Vendor-native live connect over a single WebSocket
    #[default]
    #[serde(rename = "native-live")]
    NativeLive,
    /// SDP offer/answer negotiated peer transport
    #[serde(rename = "webrtc")]
    WebRtc,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::NativeLive => "native-live",
            TransportKind::WebRtc => "webrtc",
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native-live" | "native_live" | "live" | "native" => Ok(TransportKind::NativeLive),
            "webrtc" | "peer" | "sdp" => Ok(TransportKind::WebRtc),
            other => Err(format!(
                "Unsupported transport '{other}'. Supported: native-live, webrtc"
            )),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Session parameters handed to the transport. Opaque to the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model identifier sent during the handshake
    pub model: String,

    /// Prebuilt voice for assistant audio
    #[serde(default)]
    pub voice: Option<String>,

    /// System instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,

    /// Prompt for an opening assistant utterance, sent once per session
    #[serde(default)]
    pub greeting: Option<String>,

    /// Model used to transcribe the user's audio
    #[serde(default)]
    pub input_transcription_model: Option<String>,
}

// =============================================================================
// Control Messages
// =============================================================================

/// JSON control message sent on the control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlMessage(serde_json::Value);

impl ControlMessage {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Build a control message from any serializable payload.
    pub fn from_payload<T: Serialize>(payload: &T) -> TransportResult<Self> {
        serde_json::to_value(payload)
            .map(Self)
            .map_err(|e| TransportError::Parse(e.to_string()))
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn to_text(&self) -> String {
        self.0.to_string()
    }
}

impl From<serde_json::Value> for ControlMessage {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Receives events produced by an open channel.
///
/// Implementations must not block; events are delivered synchronously on the
/// transport's task in arrival order.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Outbound side of an open channel.
///
/// `send_control` and `send_media` are fire-and-forget and must not call back
/// into the [`EventSink`] synchronously. After `close` has begun every send
/// fails with [`TransportError::Closed`].
pub trait ChannelHandle: Send + Sync {
    /// Whether control messages can currently be written.
    fn is_writable(&self) -> bool;

    fn send_control(&self, message: &ControlMessage) -> TransportResult<()>;

    fn send_media(&self, frame: Bytes) -> TransportResult<()>;

    /// Tear down the control channel, media tracks and local capture together.
    ///
    /// Teardown is best-effort: every resource is released even when an
    /// earlier step fails, and the first failure is returned.
    fn close(&self) -> TransportResult<()>;
}

/// Boxed channel handle shared between the controller and its callbacks.
pub type SharedChannel = Arc<dyn ChannelHandle>;

/// A negotiation strategy.
#[async_trait]
pub trait TransportChannel: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Negotiate the link with `credential` and start delivering events to `events`.
    ///
    /// The strategy reports [`Event::Open`] once control messages are writable.
    async fn open(
        &self,
        credential: &Credential,
        config: &SessionConfig,
        events: Arc<dyn EventSink>,
    ) -> TransportResult<SharedChannel>;

    /// Control messages issued exactly once after the channel opens.
    fn handshake(&self, _config: &SessionConfig) -> Vec<ControlMessage> {
        Vec::new()
    }
}
