//! Transcript aggregation.
//!
//! Transports deliver transcription as a stream of small deltas tagged with the
//! speaker. The aggregator folds consecutive deltas from the same speaker into
//! one pending buffer and closes it into an immutable [`Turn`] when the other
//! party starts speaking or when the session ends. A transport's end-of-turn
//! signal does not close the buffer; the same speaker continuing keeps
//! appending to it.
//!
//! # Example
//!
//! ```rust
//! use duplex_voice::core::transcript::{Speaker, TranscriptAggregator};
//!
//! let mut transcript = TranscriptAggregator::default();
//! transcript.push_delta(Speaker::User, "Hello ");
//! transcript.push_delta(Speaker::User, "there");
//! transcript.push_delta(Speaker::Assistant, "Hi!");
//! transcript.end_session();
//!
//! assert_eq!(transcript.turns().len(), 2);
//! assert_eq!(transcript.turns()[0].text, "Hello there");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One of the two logical parties in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The local user
    User,
    /// The remote assistant
    Assistant,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Assistant => write!(f, "assistant"),
        }
    }
}

/// A closed, single-speaker block of transcribed speech.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    /// Exact concatenation of the deltas folded into this turn
    pub text: String,
    pub started_at: OffsetDateTime,
    pub completed_at: OffsetDateTime,
}

/// Labels used when rendering the conversation as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerLabels {
    pub user: String,
    pub assistant: String,
}

impl Default for SpeakerLabels {
    fn default() -> Self {
        Self {
            user: "User".to_string(),
            assistant: "Assistant".to_string(),
        }
    }
}

impl SpeakerLabels {
    pub fn label(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::User => &self.user,
            Speaker::Assistant => &self.assistant,
        }
    }
}

#[derive(Debug)]
struct PendingBuffer {
    speaker: Speaker,
    text: String,
    started_at: OffsetDateTime,
}

impl PendingBuffer {
    fn close(self) -> Turn {
        Turn {
            speaker: self.speaker,
            text: self.text,
            started_at: self.started_at,
            completed_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Folds speaker-tagged deltas into ordered conversation turns.
///
/// At most one pending buffer exists at a time. Turns are appended in flush
/// order and never mutated afterwards.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    turns: Vec<Turn>,
    pending: Option<PendingBuffer>,
    labels: SpeakerLabels,
}

impl TranscriptAggregator {
    pub fn new(labels: SpeakerLabels) -> Self {
        Self {
            turns: Vec::new(),
            pending: None,
            labels,
        }
    }

    /// Fold a transcription delta into the pending buffer.
    ///
    /// A delta from the other speaker first closes the pending turn.
    pub fn push_delta(&mut self, speaker: Speaker, text: &str) {
        if self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.speaker != speaker)
        {
            self.flush();
        }

        let pending = self.pending.get_or_insert_with(|| PendingBuffer {
            speaker,
            text: String::new(),
            started_at: OffsetDateTime::now_utc(),
        });
        pending.text.push_str(text);
    }

    /// Close the pending buffer, if any, into a turn.
    ///
    /// Returns the turn that was created.
    pub fn flush(&mut self) -> Option<&Turn> {
        let pending = self.pending.take()?;
        let turn = pending.close();
        tracing::trace!(speaker = %turn.speaker, chars = turn.text.len(), "Turn closed");
        self.turns.push(turn);
        self.turns.last()
    }

    /// Session end: the pending buffer becomes the final turn.
    pub fn end_session(&mut self) {
        self.flush();
    }

    /// Closed turns in flush order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Speaker of the currently open buffer.
    pub fn pending_speaker(&self) -> Option<Speaker> {
        self.pending.as_ref().map(|pending| pending.speaker)
    }

    /// Closed turns followed by a provisional turn for the open buffer.
    pub fn conversation_history(&self) -> Vec<Turn> {
        let mut history = self.turns.clone();
        if let Some(pending) = &self.pending {
            history.push(Turn {
                speaker: pending.speaker,
                text: pending.text.clone(),
                started_at: pending.started_at,
                completed_at: OffsetDateTime::now_utc(),
            });
        }
        history
    }

    /// Render the conversation as `"<label>: <text>"` blocks separated by blank lines.
    ///
    /// Entries whose text is blank are skipped.
    pub fn conversation_as_text(&self) -> String {
        let closed = self.turns.iter().map(|turn| (turn.speaker, turn.text.as_str()));
        let open = self
            .pending
            .iter()
            .map(|pending| (pending.speaker, pending.text.as_str()));

        closed
            .chain(open)
            .filter_map(|(speaker, text)| {
                let text = text.trim();
                (!text.is_empty()).then(|| format!("{}: {}", self.labels.label(speaker), text))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Discard all turns and the pending buffer.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.pending = None;
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.pending.is_none()
    }
}
