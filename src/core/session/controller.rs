//! Session controller.
//!
//! Owns the lifecycle of one conversation attempt at a time: fetch a
//! credential, open the transport, release queued control messages once the
//! control channel is writable, and tear everything down on `stop()` or when
//! the remote side closes.
//!
//! # Locking
//!
//! All mutable state sits behind one mutex. Events are collected while the
//! lock is held and delivered to the [`EventBus`] after it is released, so
//! handlers may call back into the controller. Channel teardown also runs
//! outside the lock.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::queue::OutboundQueue;
use super::state::SessionState;
use crate::core::credentials::{CredentialBroker, CredentialError};
use crate::core::events::{Event, EventBus, EventKind, SubscriptionId};
use crate::core::transcript::{SpeakerLabels, TranscriptAggregator, Turn};
use crate::core::transport::{
    ControlMessage, EventSink, SessionConfig, SharedChannel, TransportChannel, TransportError,
    TransportKind,
};

// =============================================================================
// Error Types
// =============================================================================

/// Errors returned by controller operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// `start()` while an attempt is connecting or connected
    #[error("Session already active (state: {0})")]
    AlreadyActive(SessionState),

    #[error("Credential fetch failed: {0}")]
    Credential(#[from] CredentialError),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Local media capture failed; the session was stopped
    #[error("Device error: {0}")]
    Device(String),

    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// `stop()` ran while `start()` was in flight
    #[error("Session start cancelled")]
    Cancelled,

    #[error("Session is not connected")]
    NotConnected,

    /// Teardown has begun; nothing more is sent
    #[error("Session is ending")]
    Ending,
}

impl From<TransportError> for SessionError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Negotiation(detail) | TransportError::Unauthorized(detail) => {
                SessionError::Negotiation(detail)
            }
            TransportError::Device(detail) => SessionError::Device(detail),
            TransportError::Credential(e) => SessionError::Credential(e),
            other => SessionError::Transport(other),
        }
    }
}

/// Result of [`SessionController::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the control channel
    Sent,
    /// Held until the control channel becomes writable
    Queued,
}

/// Consumer of assistant audio.
pub trait PlaybackSink: Send + Sync {
    fn play(&self, audio: &Bytes);
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Default)]
struct ControllerState {
    state: SessionState,
    /// Incremented per `start()`; events from older attempts are dropped
    attempt: u64,
    session_id: Option<Uuid>,
    queue: OutboundQueue,
    channel: Option<SharedChannel>,
    /// The transport reported `Open` for the current attempt
    channel_open: bool,
    handshake_sent: bool,
    cancel: Option<CancellationToken>,
    playback: Option<SubscriptionId>,
}

/// Resources detached from the state under the lock and released outside it.
struct Teardown {
    channel: Option<SharedChannel>,
    playback: Option<SubscriptionId>,
}

struct Inner {
    session_config: SessionConfig,
    broker: Arc<dyn CredentialBroker>,
    transport: Arc<dyn TransportChannel>,
    bus: EventBus,
    transcript: Arc<Mutex<TranscriptAggregator>>,
    state: Mutex<ControllerState>,
    state_tx: watch::Sender<SessionState>,
}

impl Inner {
    /// Run `f` under the state lock, then deliver the events it collected.
    fn transition<R>(&self, f: impl FnOnce(&mut ControllerState, &mut Vec<Event>) -> R) -> R {
        let mut outbox = Vec::new();
        let result = {
            let mut st = self.state.lock();
            f(&mut st, &mut outbox)
        };
        for event in &outbox {
            self.bus.emit(event);
        }
        result
    }

    fn set_state(&self, st: &mut ControllerState, next: SessionState, outbox: &mut Vec<Event>) {
        if st.state == next {
            return;
        }
        tracing::info!(from = %st.state, to = %next, attempt = st.attempt, "Session state change");
        st.state = next;
        self.state_tx.send_replace(next);
        outbox.push(Event::StateChanged { state: next });
    }

    /// Move to `Connected` once the channel is both stored and open.
    fn try_activate(&self, st: &mut ControllerState, outbox: &mut Vec<Event>) {
        if st.state != SessionState::Connecting || !st.channel_open {
            return;
        }
        let Some(channel) = st.channel.clone() else {
            return;
        };

        self.set_state(st, SessionState::Connected, outbox);

        let queued = st.queue.len();
        for message in st.queue.drain() {
            if let Err(e) = channel.send_control(&message) {
                tracing::warn!("Failed to send queued control message: {}", e);
            }
        }
        if queued > 0 {
            tracing::info!("Flushed {} queued control messages", queued);
        }

        if !st.handshake_sent {
            st.handshake_sent = true;
            for message in self.transport.handshake(&self.session_config) {
                if let Err(e) = channel.send_control(&message) {
                    tracing::warn!("Failed to send handshake message: {}", e);
                }
            }
        }
    }

    /// Detach everything the attempt holds. The caller picks the next state.
    fn detach(&self, st: &mut ControllerState) -> Teardown {
        if let Some(cancel) = st.cancel.take() {
            cancel.cancel();
        }
        st.channel_open = false;

        let dropped = st.queue.clear();
        if dropped > 0 {
            tracing::info!("Dropped {} queued control messages on teardown", dropped);
        }

        Teardown {
            channel: st.channel.take(),
            playback: st.playback.take(),
        }
    }

    /// Release detached resources. Failures are logged, never raised.
    fn release(&self, teardown: Teardown) {
        if let Some(channel) = teardown.channel
            && let Err(e) = channel.close()
        {
            tracing::warn!("Teardown error while closing channel: {}", e);
        }
        if let Some(id) = teardown.playback {
            self.bus.off(EventKind::AudioOut, id);
        }
        self.transcript.lock().end_session();
    }

    /// Fail the attempt if it is still connecting. Returns `false` if it was
    /// already stopped or superseded.
    fn fail_attempt(&self, attempt: u64, detail: String) -> bool {
        self.transition(|st, outbox| {
            if st.attempt != attempt || st.state != SessionState::Connecting {
                return false;
            }
            tracing::error!("Session attempt {} failed: {}", attempt, detail);
            st.cancel = None;
            self.set_state(st, SessionState::Error, outbox);
            outbox.push(Event::Error { detail });
            true
        })
    }

    fn on_transport_event(&self, attempt: u64, event: Event) {
        let current = {
            let st = self.state.lock();
            st.attempt == attempt && st.state.is_active()
        };
        if !current {
            tracing::trace!("Dropping {} event from stale attempt {}", event.kind(), attempt);
            return;
        }

        match event {
            Event::Open => self.transition(|st, outbox| {
                if st.attempt != attempt {
                    return;
                }
                outbox.push(Event::Open);
                st.channel_open = true;
                self.try_activate(st, outbox);
            }),
            Event::Close { reason } => self.on_remote_close(attempt, reason),
            other => self.bus.emit(&other),
        }
    }

    /// The remote side closed the channel: same teardown as `stop()`.
    fn on_remote_close(&self, attempt: u64, reason: String) {
        let teardown = self.transition(|st, outbox| {
            if st.attempt != attempt || !st.state.is_active() {
                return None;
            }
            tracing::info!("Channel closed by remote: {}", reason);
            let was_connected = st.state == SessionState::Connected;
            if was_connected {
                self.set_state(st, SessionState::Ending, outbox);
            }
            Some((self.detach(st), was_connected))
        });

        let Some((teardown, was_connected)) = teardown else {
            return;
        };
        self.release(teardown);

        self.transition(|st, outbox| {
            if was_connected {
                self.set_state(st, SessionState::Disconnected, outbox);
            } else {
                self.set_state(st, SessionState::Error, outbox);
                outbox.push(Event::Error {
                    detail: format!("channel closed while connecting: {reason}"),
                });
            }
            outbox.push(Event::Close { reason });
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if let Some(cancel) = st.cancel.take() {
            cancel.cancel();
        }
        if let Some(channel) = st.channel.take()
            && let Err(e) = channel.close()
        {
            tracing::warn!("Teardown error while dropping controller: {}", e);
        }
    }
}

/// Routes transport events to the controller, tagged with their attempt.
struct AttemptSink {
    attempt: u64,
    inner: Weak<Inner>,
}

impl EventSink for AttemptSink {
    fn emit(&self, event: Event) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_transport_event(self.attempt, event);
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Drives a duplex voice session over one transport strategy.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        session_config: SessionConfig,
        broker: Arc<dyn CredentialBroker>,
        transport: Arc<dyn TransportChannel>,
    ) -> Self {
        Self::with_labels(session_config, broker, transport, SpeakerLabels::default())
    }

    /// Create a controller whose conversation text uses `labels`.
    pub fn with_labels(
        session_config: SessionConfig,
        broker: Arc<dyn CredentialBroker>,
        transport: Arc<dyn TransportChannel>,
        labels: SpeakerLabels,
    ) -> Self {
        let bus = EventBus::new();
        let transcript = Arc::new(Mutex::new(TranscriptAggregator::new(labels)));

        let deltas = transcript.clone();
        bus.on(EventKind::TranscriptDelta, move |event| {
            if let Event::TranscriptDelta { speaker, text } = event {
                deltas.lock().push_delta(*speaker, text);
            }
        });

        let (state_tx, _) = watch::channel(SessionState::Idle);

        Self {
            inner: Arc::new(Inner {
                session_config,
                broker,
                transport,
                bus,
                transcript,
                state: Mutex::new(ControllerState::default()),
                state_tx,
            }),
        }
    }

    /// Begin a new attempt.
    ///
    /// Resolves once the transport has been negotiated. The session becomes
    /// `Connected` when the transport reports the control channel open, which
    /// may happen before or after this returns.
    pub async fn start(&self) -> Result<(), SessionError> {
        let inner = &self.inner;

        let started = inner.transition(|st, outbox| {
            if !st.state.can_start() {
                return Err(SessionError::AlreadyActive(st.state));
            }
            st.attempt += 1;
            st.session_id = Some(Uuid::new_v4());
            st.channel = None;
            st.channel_open = false;
            st.handshake_sent = false;
            let cancel = CancellationToken::new();
            st.cancel = Some(cancel.clone());
            inner.set_state(st, SessionState::Connecting, outbox);
            Ok((st.attempt, cancel, st.session_id))
        });

        let (attempt, cancel, session_id) = match started {
            Ok(started) => started,
            Err(e) => {
                tracing::warn!("Rejected start: {}", e);
                return Err(e);
            }
        };

        tracing::info!(
            session_id = ?session_id,
            transport = %inner.transport.kind(),
            "Starting session"
        );

        let credential = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            result = inner.broker.fetch() => result,
        };
        let credential = match credential {
            Ok(credential) => credential,
            Err(e) => {
                if !inner.fail_attempt(attempt, e.to_string()) {
                    return Err(SessionError::Cancelled);
                }
                return Err(e.into());
            }
        };

        let sink: Arc<dyn EventSink> = Arc::new(AttemptSink {
            attempt,
            inner: Arc::downgrade(inner),
        });

        let opened = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            result = inner.transport.open(&credential, &inner.session_config, sink) => result,
        };

        let channel = match opened {
            Ok(channel) => channel,
            Err(TransportError::Device(detail)) => {
                tracing::error!("Local media capture failed: {}", detail);
                let current = inner.transition(|st, outbox| {
                    let current = st.attempt == attempt && st.state == SessionState::Connecting;
                    if current {
                        outbox.push(Event::Error {
                            detail: format!("Device error: {detail}"),
                        });
                    }
                    current
                });
                if !current {
                    return Err(SessionError::Cancelled);
                }
                self.stop();
                return Err(SessionError::Device(detail));
            }
            Err(e) => {
                if !inner.fail_attempt(attempt, e.to_string()) {
                    return Err(SessionError::Cancelled);
                }
                return Err(e.into());
            }
        };

        let late = inner.transition(|st, outbox| {
            if st.attempt != attempt || st.state != SessionState::Connecting {
                return Some(channel);
            }
            st.channel = Some(channel);
            inner.try_activate(st, outbox);
            None
        });

        if let Some(channel) = late {
            tracing::info!("Session stopped during negotiation; closing late channel");
            if let Err(e) = channel.close() {
                tracing::warn!("Teardown error while closing late channel: {}", e);
            }
            return Err(SessionError::Cancelled);
        }

        Ok(())
    }

    /// Tear the session down. Idempotent and safe from any state.
    ///
    /// Cancels an in-flight `start()`, drops queued control messages, closes
    /// the channel and local capture, detaches the playback sink and flushes
    /// the pending transcript turn. Never fails; teardown errors are logged.
    pub fn stop(&self) {
        let inner = &self.inner;

        let teardown = inner.transition(|st, outbox| {
            if matches!(st.state, SessionState::Disconnected | SessionState::Ending) {
                return None;
            }
            let was_active = st.state.is_active();
            inner.set_state(st, SessionState::Ending, outbox);
            Some((inner.detach(st), was_active))
        });

        let Some((teardown, was_active)) = teardown else {
            tracing::debug!("stop() called with no session to stop");
            return;
        };

        inner.release(teardown);

        inner.transition(|st, outbox| {
            inner.set_state(st, SessionState::Disconnected, outbox);
            if was_active {
                outbox.push(Event::Close {
                    reason: "session stopped".to_string(),
                });
            }
        });
        tracing::info!("Session stopped");
    }

    /// Send a control message, or queue it until the control channel is writable.
    pub fn send(&self, message: ControlMessage) -> Result<SendOutcome, SessionError> {
        let mut st = self.inner.state.lock();
        let state = st.state;
        match state {
            SessionState::Connected => match &st.channel {
                Some(channel) => channel
                    .send_control(&message)
                    .map(|_| SendOutcome::Sent)
                    .map_err(SessionError::Transport),
                None => Err(SessionError::NotConnected),
            },
            SessionState::Ending => Err(SessionError::Ending),
            _ => {
                st.queue.push(message);
                tracing::debug!("Queued control message ({} pending)", st.queue.len());
                Ok(SendOutcome::Queued)
            }
        }
    }

    /// Forward a media frame. Only valid while connected; media is never queued.
    pub fn send_media(&self, frame: Bytes) -> Result<(), SessionError> {
        let st = self.inner.state.lock();
        match (&st.state, &st.channel) {
            (SessionState::Connected, Some(channel)) => {
                channel.send_media(frame).map_err(SessionError::Transport)
            }
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Route assistant audio to `sink` until the next `stop()`.
    ///
    /// Replaces a previously attached sink.
    pub fn attach_playback(&self, sink: Arc<dyn PlaybackSink>) {
        let id = self.inner.bus.on(EventKind::AudioOut, move |event| {
            if let Event::AudioOut { bytes } = event {
                sink.play(bytes);
            }
        });
        let previous = self.inner.state.lock().playback.replace(id);
        if let Some(previous) = previous {
            self.inner.bus.off(EventKind::AudioOut, previous);
        }
    }

    /// Register an event handler.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.bus.on(kind, handler)
    }

    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.inner.bus.off(kind, id)
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.lock().state
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.inner.transport.kind()
    }

    /// Identifier of the current or most recent attempt.
    pub fn session_id(&self) -> Option<Uuid> {
        self.inner.state.lock().session_id
    }

    pub fn queued_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Closed turns and the open buffer, rendered with speaker labels.
    pub fn conversation_text(&self) -> String {
        self.inner.transcript.lock().conversation_as_text()
    }

    pub fn conversation_history(&self) -> Vec<Turn> {
        self.inner.transcript.lock().conversation_history()
    }

    /// Discard the transcript.
    pub fn clear(&self) {
        self.inner.transcript.lock().clear();
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("SessionController")
            .field("state", &st.state)
            .field("transport", &self.inner.transport.kind())
            .field("session_id", &st.session_id)
            .field("queued", &st.queue.len())
            .finish()
    }
}
