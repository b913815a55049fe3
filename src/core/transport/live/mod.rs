//! Vendor-native live-connect strategy.
//!
//! One WebSocket carries JSON control frames in both directions and audio as
//! base64 PCM. The first outbound frame is always `setup`.
//!
//! # Audio Format
//!
//! Microphone audio is sent as PCM16 mono at 16kHz. Assistant audio arrives
//! as PCM16 mono at 24kHz inside `serverContent.modelTurn` parts.

mod client;
mod config;
mod messages;

pub use client::{LiveChannel, LiveTransport};
pub use config::{
    LIVE_DEFAULT_MODEL, LIVE_DEFAULT_URL, LIVE_DEFAULT_VOICE, LIVE_INPUT_SAMPLE_RATE,
    build_live_url, normalize_model,
};
pub use messages::{
    LiveServerMessage, ModelTurn, ServerContent, Transcription, client_content, realtime_audio,
    setup_message, tool_response,
};
