//! Typed publish/subscribe surface for session events.
//!
//! Transports report lifecycle and data events through the [`EventBus`].
//! Handlers run synchronously, in registration order, on the task that
//! emitted the event. A panicking handler is logged and skipped so the
//! remaining handlers still run. Ordering is only guaranteed within one
//! [`EventKind`].
//!
//! # Example
//!
//! ```rust
//! use duplex_voice::core::events::{Event, EventBus, EventKind};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let bus = EventBus::new();
//! let opened = Arc::new(AtomicUsize::new(0));
//! let counter = opened.clone();
//! let id = bus.on(EventKind::Open, move |_| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! bus.emit(&Event::Open);
//! assert!(bus.off(EventKind::Open, id));
//! bus.emit(&Event::Open);
//! assert_eq!(opened.load(Ordering::SeqCst), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::core::session::SessionState;
use crate::core::transcript::Speaker;

// =============================================================================
// Events
// =============================================================================

/// Event produced by a transport or the session controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Control channel became writable
    Open,
    /// Channel closed
    Close { reason: String },
    /// Remote or transport error
    Error { detail: String },
    /// Audio from the assistant, ready for playback
    AudioOut { bytes: Bytes },
    /// Partial transcription
    TranscriptDelta { speaker: Speaker, text: String },
    /// The remote finished its turn
    TurnComplete,
    /// The model requested a tool invocation
    ToolCall { payload: serde_json::Value },
    /// The model withdrew earlier tool calls
    ToolCallCancellation { payload: serde_json::Value },
    /// Non-audio parts of a model turn
    Content { payload: serde_json::Value },
    /// The remote interrupted its own generation
    Interrupted,
    /// The remote acknowledged the session setup
    SetupComplete,
    /// The controller moved to a new lifecycle state
    StateChanged { state: SessionState },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Open => EventKind::Open,
            Event::Close { .. } => EventKind::Close,
            Event::Error { .. } => EventKind::Error,
            Event::AudioOut { .. } => EventKind::AudioOut,
            Event::TranscriptDelta { .. } => EventKind::TranscriptDelta,
            Event::TurnComplete => EventKind::TurnComplete,
            Event::ToolCall { .. } => EventKind::ToolCall,
            Event::ToolCallCancellation { .. } => EventKind::ToolCallCancellation,
            Event::Content { .. } => EventKind::Content,
            Event::Interrupted => EventKind::Interrupted,
            Event::SetupComplete => EventKind::SetupComplete,
            Event::StateChanged { .. } => EventKind::StateChanged,
        }
    }
}

/// Discriminant of [`Event`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Error,
    AudioOut,
    TranscriptDelta,
    TurnComplete,
    ToolCall,
    ToolCallCancellation,
    Content,
    Interrupted,
    SetupComplete,
    StateChanged,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Open => "open",
            EventKind::Close => "close",
            EventKind::Error => "error",
            EventKind::AudioOut => "audioOut",
            EventKind::TranscriptDelta => "transcriptDelta",
            EventKind::TurnComplete => "turnComplete",
            EventKind::ToolCall => "toolCall",
            EventKind::ToolCallCancellation => "toolCallCancellation",
            EventKind::Content => "content",
            EventKind::Interrupted => "interrupted",
            EventKind::SetupComplete => "setupComplete",
            EventKind::StateChanged => "stateChanged",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Bus
// =============================================================================

/// Handler invoked for every event of the kind it was registered for.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Token returned by [`EventBus::on`], used to unregister the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Registry {
    handlers: HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>,
}

/// Synchronous publish/subscribe bus.
///
/// Cloning the bus yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry
            .write()
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Unregister a handler. Returns `false` if it was not registered for `kind`.
    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write();
        let Some(handlers) = registry.handlers.get_mut(&kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        before != handlers.len()
    }

    /// Deliver `event` to every handler registered for its kind.
    ///
    /// Handlers are snapshotted before delivery, so a handler may register or
    /// unregister handlers without deadlocking.
    pub fn emit(&self, event: &Event) {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = match self.registry.read().handlers.get(&kind) {
            Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
            None => return,
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!("Event handler for '{}' panicked; continuing", kind);
            }
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.registry
            .read()
            .handlers
            .get(&kind)
            .map_or(0, |handlers| handlers.len())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read();
        let counts: HashMap<String, usize> = registry
            .handlers
            .iter()
            .map(|(kind, handlers)| (kind.to_string(), handlers.len()))
            .collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}
