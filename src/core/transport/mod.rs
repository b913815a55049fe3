//! Session transports.
//!
//! Two interchangeable negotiation strategies sit behind [`TransportChannel`]:
//!
//! - [`live::LiveTransport`]: vendor-native live connect over one WebSocket
//! - [`webrtc::WebRtcTransport`]: SDP offer/answer with a control data channel
//!
//! The strategy is chosen when the session controller is constructed.

mod base;
pub mod live;
pub mod webrtc;

pub use base::{
    ChannelHandle, ControlMessage, EventSink, SessionConfig, SharedChannel, TransportChannel,
    TransportError, TransportKind, TransportResult,
};
pub use live::LiveTransport;
pub use webrtc::WebRtcTransport;
