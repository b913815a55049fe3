pub mod credentials;
pub mod events;
pub mod session;
pub mod transcript;
pub mod transport;

// Re-export commonly used types for convenience
pub use credentials::{Credential, CredentialBroker, CredentialError, HttpCredentialBroker};

pub use events::{Event, EventBus, EventHandler, EventKind, SubscriptionId};

pub use session::{
    OutboundQueue, PlaybackSink, SendOutcome, SessionController, SessionError, SessionState,
};

pub use transcript::{Speaker, SpeakerLabels, TranscriptAggregator, Turn};

pub use transport::{
    ChannelHandle, ControlMessage, EventSink, LiveTransport, SessionConfig, SharedChannel,
    TransportChannel, TransportError, TransportKind, TransportResult, WebRtcTransport,
};
