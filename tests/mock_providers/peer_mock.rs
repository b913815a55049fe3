//! Platform peer doubles
//!
//! Every capability records its calls into one shared log so tests can check
//! the order of the offer/answer sequence and that teardown released each
//! resource.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use duplex_voice::core::transport::webrtc::{
    DataChannel, LocalAudioTrack, MediaDevices, MediaKind, PeerConnection, PeerEvent,
    PeerEventHandler, PeerFactory, SessionDescription, TransceiverDirection,
};
use duplex_voice::{TransportError, TransportResult};

pub const MOCK_OFFER_SDP: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=offer\r\n";

pub type CallLog = Arc<Mutex<Vec<String>>>;

fn record(log: &CallLog, call: impl Into<String>) {
    log.lock().push(call.into());
}

// =============================================================================
// Microphone
// =============================================================================

pub struct MockTrack {
    log: CallLog,
    pub frames: Mutex<Vec<Bytes>>,
    pub stopped: AtomicBool,
}

impl LocalAudioTrack for MockTrack {
    fn id(&self) -> String {
        "mock-mic".to_string()
    }

    fn write_frame(&self, frame: Bytes) -> TransportResult<()> {
        self.frames.lock().push(frame);
        Ok(())
    }

    fn stop(&self) {
        record(&self.log, "track.stop");
        self.stopped.store(true, Ordering::SeqCst);
    }
}

pub struct MockDevices {
    log: CallLog,
    deny: bool,
    pub track: Mutex<Option<Arc<MockTrack>>>,
}

impl MockDevices {
    pub fn new(log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            deny: false,
            track: Mutex::new(None),
        })
    }

    /// Devices whose capture is refused, like a denied microphone permission.
    pub fn denied(log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            deny: true,
            track: Mutex::new(None),
        })
    }

    pub fn captured(&self) -> Option<Arc<MockTrack>> {
        self.track.lock().clone()
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn capture_audio(&self) -> TransportResult<Arc<dyn LocalAudioTrack>> {
        record(&self.log, "capture_audio");
        if self.deny {
            return Err(TransportError::Device("permission denied".to_string()));
        }
        let track = Arc::new(MockTrack {
            log: self.log.clone(),
            frames: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        });
        *self.track.lock() = Some(track.clone());
        Ok(track)
    }
}

// =============================================================================
// Data channel
// =============================================================================

pub struct MockDataChannel {
    log: CallLog,
    label: String,
    open: AtomicBool,
    pub sent: Mutex<Vec<String>>,
    pub close_calls: AtomicUsize,
}

impl MockDataChannel {
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Sent messages parsed back to JSON.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).expect("sent text is JSON"))
            .collect()
    }
}

impl DataChannel for MockDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: &str) -> TransportResult<()> {
        if !self.is_open() {
            return Err(TransportError::Connection("data channel closed".to_string()));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    fn close(&self) -> TransportResult<()> {
        record(&self.log, "data_channel.close");
        self.open.store(false, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Peer connection
// =============================================================================

/// Where the offer/answer sequence should fail, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerFailure {
    None,
    CreateOffer,
    SetRemote,
}

pub struct MockPeer {
    log: CallLog,
    failure: PeerFailure,
    handler: Mutex<Option<PeerEventHandler>>,
    pub data_channel: Mutex<Option<Arc<MockDataChannel>>>,
    pub remote_answer: Mutex<Option<SessionDescription>>,
    pub closed: AtomicBool,
}

impl MockPeer {
    /// Raise a platform event, as the peer's own thread would.
    pub fn fire(&self, event: PeerEvent) {
        if matches!(event, PeerEvent::DataChannelOpen)
            && let Some(dc) = self.data_channel.lock().as_ref()
        {
            dc.set_open(true);
        }
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn channel(&self) -> Arc<MockDataChannel> {
        self.data_channel
            .lock()
            .clone()
            .expect("data channel was never created")
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    fn set_event_handler(&self, handler: PeerEventHandler) {
        *self.handler.lock() = Some(handler);
    }

    fn add_audio_track(&self, track: Arc<dyn LocalAudioTrack>) -> TransportResult<()> {
        record(&self.log, format!("add_audio_track:{}", track.id()));
        Ok(())
    }

    fn add_transceiver(
        &self,
        kind: MediaKind,
        direction: TransceiverDirection,
    ) -> TransportResult<()> {
        record(&self.log, format!("add_transceiver:{kind}:{direction:?}"));
        Ok(())
    }

    fn create_data_channel(&self, label: &str) -> TransportResult<Arc<dyn DataChannel>> {
        record(&self.log, format!("create_data_channel:{label}"));
        let dc = Arc::new(MockDataChannel {
            log: self.log.clone(),
            label: label.to_string(),
            open: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        });
        *self.data_channel.lock() = Some(dc.clone());
        Ok(dc)
    }

    async fn create_offer(&self) -> TransportResult<SessionDescription> {
        record(&self.log, "create_offer");
        if self.failure == PeerFailure::CreateOffer {
            return Err(TransportError::Negotiation("offer creation failed".to_string()));
        }
        Ok(SessionDescription::offer(MOCK_OFFER_SDP))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> TransportResult<()> {
        record(&self.log, format!("set_local_description:{:?}", description.sdp_type));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> TransportResult<()> {
        record(&self.log, format!("set_remote_description:{:?}", description.sdp_type));
        if self.failure == PeerFailure::SetRemote {
            return Err(TransportError::Negotiation("answer rejected".to_string()));
        }
        *self.remote_answer.lock() = Some(description);
        Ok(())
    }

    fn close(&self) -> TransportResult<()> {
        record(&self.log, "peer.close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockPeerFactory {
    log: CallLog,
    failure: PeerFailure,
    pub peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockPeerFactory {
    pub fn new(log: CallLog) -> Arc<Self> {
        Self::failing_at(log, PeerFailure::None)
    }

    pub fn failing_at(log: CallLog, failure: PeerFailure) -> Arc<Self> {
        Arc::new(Self {
            log,
            failure,
            peers: Mutex::new(Vec::new()),
        })
    }

    pub fn peer(&self) -> Arc<MockPeer> {
        self.peers
            .lock()
            .last()
            .cloned()
            .expect("no peer was created")
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

#[async_trait]
impl PeerFactory for MockPeerFactory {
    async fn create_peer(&self) -> TransportResult<Arc<dyn PeerConnection>> {
        record(&self.log, "create_peer");
        let peer = Arc::new(MockPeer {
            log: self.log.clone(),
            failure: self.failure,
            handler: Mutex::new(None),
            data_channel: Mutex::new(None),
            remote_answer: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }
}
