//! Mock collaborators for session tests
//!
//! - `MockBroker`: scripted credential sequence with fetch counting
//! - `MockTransport` / `MockChannel`: records opens and outbound traffic and
//!   exposes the event sink so tests can play the remote side
//! - `peer_mock`: platform peer, data channel and microphone doubles

// Allow dead code in test infrastructure - not every test file uses every mock
#![allow(dead_code)]

pub mod peer_mock;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use duplex_voice::{
    ChannelHandle, ControlMessage, Credential, CredentialBroker, CredentialError, Event, EventBus,
    EventKind, EventSink, SessionConfig, SharedChannel, TransportChannel, TransportError,
    TransportKind, TransportResult,
};

// =============================================================================
// Credentials
// =============================================================================

/// Broker returning scripted results in order; the last one repeats.
pub struct MockBroker {
    script: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Result<String, String>>,
    fetches: AtomicUsize,
    block: AtomicBool,
}

impl MockBroker {
    pub fn tokens(tokens: &[&str]) -> Arc<Self> {
        Self::scripted(tokens.iter().map(|t| Ok(t.to_string())).collect())
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::scripted(vec![Err(message.to_string())])
    }

    /// A broker whose fetch never completes.
    pub fn blocking() -> Arc<Self> {
        let broker = Self::tokens(&["never"]);
        broker.block.store(true, Ordering::SeqCst);
        broker
    }

    fn scripted(script: Vec<Result<String, String>>) -> Arc<Self> {
        let last = script
            .last()
            .cloned()
            .unwrap_or_else(|| Err("empty script".to_string()));
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(last),
            fetches: AtomicUsize::new(0),
            block: AtomicBool::new(false),
        })
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialBroker for MockBroker {
    async fn fetch(&self) -> Result<Credential, CredentialError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.block.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let next = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.last.lock().clone());
        next.map(Credential::new).map_err(CredentialError::Request)
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Channel handle that records everything sent through it.
#[derive(Default)]
pub struct MockChannel {
    pub sent: Mutex<Vec<Value>>,
    pub media: Mutex<Vec<Bytes>>,
    pub close_calls: AtomicUsize,
    closing: AtomicBool,
}

impl MockChannel {
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl ChannelHandle for MockChannel {
    fn is_writable(&self) -> bool {
        !self.closing.load(Ordering::SeqCst)
    }

    fn send_control(&self, message: &ControlMessage) -> TransportResult<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(message.as_value().clone());
        Ok(())
    }

    fn send_media(&self, frame: Bytes) -> TransportResult<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.media.lock().push(frame);
        Ok(())
    }

    fn close(&self) -> TransportResult<()> {
        self.closing.store(true, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// How `MockTransport::open` behaves.
#[derive(Debug, Clone)]
pub enum OpenBehavior {
    /// Report `Open` before returning the handle
    OpenImmediately,
    /// Return the handle; the test reports `Open` through the sink
    OpenLater,
    /// Fail with the given error
    Fail(fn() -> TransportError),
}

/// Transport double that hands out `MockChannel`s.
pub struct MockTransport {
    behavior: OpenBehavior,
    handshake: Vec<ControlMessage>,
    pub channels: Mutex<Vec<Arc<MockChannel>>>,
    pub sinks: Mutex<Vec<Arc<dyn EventSink>>>,
    pub credentials: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(behavior: OpenBehavior) -> Arc<Self> {
        Self::with_handshake(behavior, Vec::new())
    }

    pub fn with_handshake(behavior: OpenBehavior, handshake: Vec<ControlMessage>) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            handshake,
            channels: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
            credentials: Mutex::new(Vec::new()),
        })
    }

    pub fn open_count(&self) -> usize {
        self.credentials.lock().len()
    }

    /// Channel returned by the most recent `open`.
    pub fn channel(&self) -> Arc<MockChannel> {
        self.channels
            .lock()
            .last()
            .cloned()
            .expect("transport was never opened")
    }

    /// Sink passed to the most recent `open`.
    pub fn sink(&self) -> Arc<dyn EventSink> {
        self.sinks
            .lock()
            .last()
            .cloned()
            .expect("transport was never opened")
    }
}

#[async_trait]
impl TransportChannel for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::NativeLive
    }

    async fn open(
        &self,
        credential: &Credential,
        _config: &SessionConfig,
        events: Arc<dyn EventSink>,
    ) -> TransportResult<SharedChannel> {
        self.credentials.lock().push(credential.expose().to_string());
        self.sinks.lock().push(events.clone());

        if let OpenBehavior::Fail(make_error) = &self.behavior {
            return Err(make_error());
        }

        let channel = Arc::new(MockChannel::default());
        self.channels.lock().push(channel.clone());

        if matches!(self.behavior, OpenBehavior::OpenImmediately) {
            events.emit(Event::Open);
        }
        Ok(channel)
    }

    fn handshake(&self, _config: &SessionConfig) -> Vec<ControlMessage> {
        self.handshake.clone()
    }
}

// =============================================================================
// Event capture
// =============================================================================

/// Forward every event of `kinds` on `bus` into a channel.
pub fn capture(bus: &EventBus, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in kinds {
        let tx = tx.clone();
        bus.on(*kind, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    rx
}

/// Wait for the next captured event matching `predicate`.
pub async fn next_matching(
    rx: &mut mpsc::UnboundedReceiver<Event>,
    predicate: impl Fn(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(event) if predicate(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
