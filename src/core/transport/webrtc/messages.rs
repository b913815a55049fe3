//! Data-channel control messages for the peer strategy.
//!
//! Inbound messages are JSON objects tagged by `type`. Only the events that
//! feed the transcript or the session lifecycle are modeled; everything else
//! deserializes to [`DataChannelEvent::Unknown`].

use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::events::Event;
use crate::core::transcript::Speaker;
use crate::core::transport::{ControlMessage, SessionConfig};

/// Transcription model used when the session config names none.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

// =============================================================================
// Client Events
// =============================================================================

/// `session.update` sent once the data channel opens.
pub fn session_update(config: &SessionConfig) -> ControlMessage {
    let transcription_model = config
        .input_transcription_model
        .as_deref()
        .unwrap_or(DEFAULT_TRANSCRIPTION_MODEL);

    let mut session = json!({
        "input_audio_transcription": { "model": transcription_model },
        "turn_detection": { "type": "server_vad" },
    });

    if let Some(object) = session.as_object_mut() {
        if let Some(instructions) = &config.instructions {
            object.insert("instructions".to_string(), json!(instructions));
        }
        if let Some(voice) = &config.voice {
            object.insert("voice".to_string(), json!(voice));
        }
    }

    ControlMessage::new(json!({ "type": "session.update", "session": session }))
}

/// `response.create` asking for a spoken reply following `instructions`.
pub fn response_create(instructions: &str) -> ControlMessage {
    ControlMessage::new(json!({
        "type": "response.create",
        "response": {
            "modalities": ["text", "audio"],
            "instructions": instructions,
        }
    }))
}

/// Ask the model for a verbatim log of the conversation as structured JSON.
///
/// The reply arrives as text deltas that parse into
/// `{"lang": <language>, "turns": [{"role", "text"}]}`.
pub fn conversation_log_request(language: &str) -> ControlMessage {
    ControlMessage::new(json!({
        "type": "response.create",
        "response": {
            "instructions": "Return a verbatim log of the conversation so far as an array of user and assistant utterances. Output JSON only.",
            "modalities": ["text"],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "conversation_log",
                    "schema": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "lang": { "type": "string", "enum": [language] },
                            "turns": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "additionalProperties": false,
                                    "properties": {
                                        "role": { "type": "string", "enum": ["user", "assistant"] },
                                        "text": { "type": "string" }
                                    },
                                    "required": ["role", "text"]
                                }
                            }
                        },
                        "required": ["lang", "turns"]
                    },
                    "strict": true
                }
            }
        }
    }))
}

// =============================================================================
// Server Events
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
}

/// Inbound data-channel event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum DataChannelEvent {
    #[serde(rename = "session.created", alias = "session.updated")]
    SessionReady,

    /// Final transcription of a user utterance
    #[serde(
        rename = "conversation.item.input_audio_transcription.completed",
        alias = "input_audio_transcription.completed"
    )]
    InputTranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    /// Incremental assistant transcript or text
    #[serde(
        rename = "response.audio_transcript.delta",
        alias = "response.output_audio_transcript.delta",
        alias = "response.output_text.delta",
        alias = "response.text.delta"
    )]
    AssistantDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.done", alias = "response.completed")]
    ResponseDone,

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: String,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorDetail,
    },

    #[serde(other)]
    Unknown,
}

impl DataChannelEvent {
    pub fn into_events(self) -> Vec<Event> {
        match self {
            Self::SessionReady => vec![Event::SetupComplete],
            Self::InputTranscriptionCompleted { transcript } if !transcript.is_empty() => {
                vec![Event::TranscriptDelta {
                    speaker: Speaker::User,
                    text: transcript,
                }]
            }
            Self::AssistantDelta { delta } if !delta.is_empty() => {
                vec![Event::TranscriptDelta {
                    speaker: Speaker::Assistant,
                    text: delta,
                }]
            }
            Self::ResponseDone => vec![Event::TurnComplete],
            Self::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => vec![Event::ToolCall {
                payload: json!({ "call_id": call_id, "name": name, "arguments": arguments }),
            }],
            Self::Error { error } => vec![Event::Error {
                detail: error
                    .message
                    .or(error.code)
                    .unwrap_or_else(|| "unspecified realtime error".to_string()),
            }],
            Self::InputTranscriptionCompleted { .. } | Self::AssistantDelta { .. } => Vec::new(),
            Self::Unknown => Vec::new(),
        }
    }
}

/// Parse one data-channel message.
///
/// Returns `None` for non-JSON text and for JSON that does not match a known
/// event shape; both are dropped.
pub fn parse_data_channel_message(text: &str) -> Option<DataChannelEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            tracing::trace!("Ignoring non-JSON data channel message");
            return None;
        }
    };

    match serde_json::from_value::<DataChannelEvent>(value) {
        Ok(DataChannelEvent::Unknown) => {
            tracing::trace!("Ignoring unhandled data channel event");
            Some(DataChannelEvent::Unknown)
        }
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!("Dropping malformed data channel event: {}", e);
            None
        }
    }
}
