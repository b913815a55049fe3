//! Negotiated peer strategy (SDP offer/answer).
//!
//! Media travels on RTP tracks; JSON control messages travel on the
//! `oai-events` data channel. Peer connections and microphone capture are
//! platform capabilities supplied through the traits in [`peer`].
//!
//! # Example
//!
//! ```rust,ignore
//! use duplex_voice::core::transport::webrtc::{SdpNegotiator, WebRtcTransport};
//!
//! let negotiator = SdpNegotiator::new(
//!     "https://api.openai.com/v1/realtime",
//!     "gpt-realtime",
//!     broker.clone(),
//! );
//! let transport = WebRtcTransport::new(platform_peers, platform_devices, negotiator);
//! ```

mod client;
mod messages;
mod negotiation;
pub mod peer;

pub use client::{CONTROL_CHANNEL_LABEL, WebRtcChannel, WebRtcTransport};
pub use messages::{
    DEFAULT_TRANSCRIPTION_MODEL, DataChannelEvent, ErrorDetail, conversation_log_request,
    parse_data_channel_message, response_create, session_update,
};
pub use negotiation::{
    DEFAULT_NEGOTIATION_URL, DEFAULT_REALTIME_MODEL, NegotiationResponse, SdpNegotiator,
    validate_answer,
};
pub use peer::{
    DataChannel, LocalAudioTrack, MediaDevices, MediaKind, PeerConnection, PeerEvent,
    PeerEventHandler, PeerFactory, SdpType, SessionDescription, TransceiverDirection,
};
