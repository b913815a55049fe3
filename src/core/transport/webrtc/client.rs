//! Negotiated peer transport.
//!
//! # Connection Flow
//!
//! 1. Capture the microphone
//! 2. Create the peer, attach the microphone track and a receive-only video
//!    transceiver (some endpoints reject offers without a video m-line)
//! 3. Create the `oai-events` data channel so it is embedded in the offer
//! 4. Create and apply the local offer, exchange it for an answer
//! 5. Apply the answer; the channel is writable once the data channel opens
//!
//! Any failure before the answer is applied releases everything acquired so
//! far.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use super::messages::{parse_data_channel_message, response_create, session_update};
use super::negotiation::SdpNegotiator;
use super::peer::{
    DataChannel, LocalAudioTrack, MediaDevices, MediaKind, PeerConnection, PeerEvent, PeerFactory,
    SessionDescription, TransceiverDirection,
};
use crate::core::credentials::Credential;
use crate::core::events::Event;
use crate::core::transport::{
    ChannelHandle, ControlMessage, EventSink, SessionConfig, SharedChannel, TransportChannel,
    TransportError, TransportKind, TransportResult,
};

/// Label of the control data channel.
pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";

// =============================================================================
// Resource Guard
// =============================================================================

/// Releases peer resources unless disarmed.
///
/// Also runs when the `open` future is dropped mid-negotiation.
struct PeerResources {
    track: Option<Arc<dyn LocalAudioTrack>>,
    peer: Option<Arc<dyn PeerConnection>>,
    data_channel: Option<Arc<dyn DataChannel>>,
    closing: Arc<AtomicBool>,
}

impl PeerResources {
    fn disarm(mut self) {
        self.track = None;
        self.peer = None;
        self.data_channel = None;
    }
}

impl Drop for PeerResources {
    fn drop(&mut self) {
        if self.track.is_none() && self.peer.is_none() && self.data_channel.is_none() {
            return;
        }
        self.closing.store(true, Ordering::SeqCst);
        tracing::debug!("Releasing peer resources after failed negotiation");
        let _ = release(
            self.data_channel.take(),
            self.peer.take(),
            self.track.take(),
        );
    }
}

/// Close data channel, peer and capture. Every step runs; the first error is returned.
fn release(
    data_channel: Option<Arc<dyn DataChannel>>,
    peer: Option<Arc<dyn PeerConnection>>,
    track: Option<Arc<dyn LocalAudioTrack>>,
) -> TransportResult<()> {
    let mut first_error = None;

    if let Some(channel) = data_channel
        && let Err(e) = channel.close()
    {
        tracing::warn!("Failed to close data channel: {}", e);
        first_error.get_or_insert(e);
    }
    if let Some(peer) = peer
        && let Err(e) = peer.close()
    {
        tracing::warn!("Failed to close peer connection: {}", e);
        first_error.get_or_insert(e);
    }
    if let Some(track) = track {
        track.stop();
    }

    first_error.map_or(Ok(()), Err)
}

// =============================================================================
// Transport
// =============================================================================

/// SDP-negotiated peer strategy.
pub struct WebRtcTransport {
    peer_factory: Arc<dyn PeerFactory>,
    devices: Arc<dyn MediaDevices>,
    negotiator: SdpNegotiator,
}

impl WebRtcTransport {
    pub fn new(
        peer_factory: Arc<dyn PeerFactory>,
        devices: Arc<dyn MediaDevices>,
        negotiator: SdpNegotiator,
    ) -> Self {
        Self {
            peer_factory,
            devices,
            negotiator,
        }
    }

    pub fn negotiator(&self) -> &SdpNegotiator {
        &self.negotiator
    }
}

fn peer_event_handler(
    events: Arc<dyn EventSink>,
    writable: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
) -> impl Fn(PeerEvent) + Send + Sync + 'static {
    move |event| {
        if closing.load(Ordering::SeqCst) {
            return;
        }
        match event {
            PeerEvent::DataChannelOpen => {
                tracing::info!("Control data channel open");
                writable.store(true, Ordering::SeqCst);
                events.emit(Event::Open);
            }
            PeerEvent::DataChannelMessage(text) => {
                if let Some(parsed) = parse_data_channel_message(&text) {
                    for event in parsed.into_events() {
                        events.emit(event);
                    }
                }
            }
            PeerEvent::RemoteAudio(bytes) => events.emit(Event::AudioOut { bytes }),
            PeerEvent::DataChannelClose => {
                writable.store(false, Ordering::SeqCst);
                if !closing.swap(true, Ordering::SeqCst) {
                    events.emit(Event::Close {
                        reason: "data channel closed".to_string(),
                    });
                }
            }
            PeerEvent::ConnectionFailed(reason) => {
                writable.store(false, Ordering::SeqCst);
                tracing::error!("Peer connection failed: {}", reason);
                events.emit(Event::Error {
                    detail: reason.clone(),
                });
                if !closing.swap(true, Ordering::SeqCst) {
                    events.emit(Event::Close { reason });
                }
            }
        }
    }
}

#[async_trait]
impl TransportChannel for WebRtcTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebRtc
    }

    async fn open(
        &self,
        credential: &Credential,
        _config: &SessionConfig,
        events: Arc<dyn EventSink>,
    ) -> TransportResult<SharedChannel> {
        let track = self.devices.capture_audio().await.map_err(|e| match e {
            TransportError::Device(_) => e,
            other => TransportError::Device(other.to_string()),
        })?;
        tracing::debug!("Captured local audio track {}", track.id());

        let closing = Arc::new(AtomicBool::new(false));
        let writable = Arc::new(AtomicBool::new(false));
        let mut resources = PeerResources {
            track: Some(track.clone()),
            peer: None,
            data_channel: None,
            closing: closing.clone(),
        };

        let peer = self.peer_factory.create_peer().await?;
        resources.peer = Some(peer.clone());

        peer.set_event_handler(Arc::new(peer_event_handler(
            events,
            writable.clone(),
            closing.clone(),
        )));

        peer.add_audio_track(track.clone())?;
        peer.add_transceiver(MediaKind::Video, TransceiverDirection::RecvOnly)?;

        let data_channel = peer.create_data_channel(CONTROL_CHANNEL_LABEL)?;
        resources.data_channel = Some(data_channel.clone());

        let offer = peer.create_offer().await?;
        peer.set_local_description(offer.clone()).await?;

        let answer = self.negotiator.negotiate(&offer.sdp, credential).await?;
        peer.set_remote_description(SessionDescription::answer(answer))
            .await?;

        resources.disarm();
        tracing::info!("Peer transport negotiated; waiting for data channel");

        Ok(Arc::new(WebRtcChannel {
            peer,
            data_channel,
            track,
            writable,
            closing,
        }))
    }

    fn handshake(&self, config: &SessionConfig) -> Vec<ControlMessage> {
        let mut messages = vec![session_update(config)];
        if let Some(greeting) = &config.greeting {
            messages.push(response_create(greeting));
        }
        messages
    }
}

// =============================================================================
// Channel Handle
// =============================================================================

/// Outbound side of a negotiated peer transport.
pub struct WebRtcChannel {
    peer: Arc<dyn PeerConnection>,
    data_channel: Arc<dyn DataChannel>,
    track: Arc<dyn LocalAudioTrack>,
    writable: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
}

impl ChannelHandle for WebRtcChannel {
    fn is_writable(&self) -> bool {
        !self.closing.load(Ordering::SeqCst)
            && self.writable.load(Ordering::SeqCst)
            && self.data_channel.is_open()
    }

    fn send_control(&self, message: &ControlMessage) -> TransportResult<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.writable.load(Ordering::SeqCst) {
            return Err(TransportError::Connection(
                "data channel is not open".to_string(),
            ));
        }
        self.data_channel.send_text(&message.to_text())
    }

    fn send_media(&self, frame: Bytes) -> TransportResult<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.track.write_frame(frame)
    }

    fn close(&self) -> TransportResult<()> {
        // A remote close already set `closing`; resources still need releasing.
        self.closing.store(true, Ordering::SeqCst);
        self.writable.store(false, Ordering::SeqCst);
        release(
            Some(self.data_channel.clone()),
            Some(self.peer.clone()),
            Some(self.track.clone()),
        )
    }
}
