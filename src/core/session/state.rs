//! Session lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the session owned by a controller.
///
/// Per attempt the state only moves forward:
/// `Idle -> Connecting -> Connected -> Ending -> Disconnected`, with `Error`
/// reachable from `Connecting` or `Connected`. A new `start()` begins a fresh
/// attempt from `Idle`, `Disconnected` or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Ending,
    Disconnected,
    Error,
}

impl SessionState {
    /// Whether a new attempt may be started from this state.
    #[inline]
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Disconnected | SessionState::Error
        )
    }

    /// Whether an attempt is in flight or established.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Ending => "ending",
            SessionState::Disconnected => "disconnected",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
