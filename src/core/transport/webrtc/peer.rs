//! Platform capabilities used by the peer strategy.
//!
//! Peer connections, data channels and microphone capture are provided by the
//! host platform. The engine drives them through these traits and owns the
//! negotiation and teardown order.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::transport::TransportResult;

// =============================================================================
// Session Descriptions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP blob with its role in the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

// =============================================================================
// Peer Events
// =============================================================================

/// Notifications raised by the platform peer connection.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// The control data channel became writable
    DataChannelOpen,
    /// Text received on the control data channel
    DataChannelMessage(String),
    /// The control data channel closed
    DataChannelClose,
    /// Decoded audio from the remote track
    RemoteAudio(Bytes),
    /// ICE or DTLS failure; the peer is unusable
    ConnectionFailed(String),
}

/// Callback installed on a peer connection. Invoked on the platform's thread.
pub type PeerEventHandler = Arc<dyn Fn(PeerEvent) + Send + Sync>;

// =============================================================================
// Capability Traits
// =============================================================================

/// A captured microphone track.
pub trait LocalAudioTrack: Send + Sync {
    fn id(&self) -> String;

    /// Push a PCM frame into the outgoing RTP stream.
    fn write_frame(&self, frame: Bytes) -> TransportResult<()>;

    /// Stop capture and release the device.
    fn stop(&self);
}

/// Access to local capture devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire the microphone. Failures are reported as `TransportError::Device`.
    async fn capture_audio(&self) -> TransportResult<Arc<dyn LocalAudioTrack>>;
}

/// Reliable ordered data channel used for JSON control messages.
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    fn send_text(&self, text: &str) -> TransportResult<()>;

    fn close(&self) -> TransportResult<()>;
}

/// A platform peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn set_event_handler(&self, handler: PeerEventHandler);

    fn add_audio_track(&self, track: Arc<dyn LocalAudioTrack>) -> TransportResult<()>;

    fn add_transceiver(
        &self,
        kind: MediaKind,
        direction: TransceiverDirection,
    ) -> TransportResult<()>;

    /// Must be called before the offer is created so the channel is part of the SDP.
    fn create_data_channel(&self, label: &str) -> TransportResult<Arc<dyn DataChannel>>;

    async fn create_offer(&self) -> TransportResult<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription)
    -> TransportResult<()>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> TransportResult<()>;

    fn close(&self) -> TransportResult<()>;
}

/// Creates peer connections.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create_peer(&self) -> TransportResult<Arc<dyn PeerConnection>>;
}
