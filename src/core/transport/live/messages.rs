//! Live-connect WebSocket message types.
//!
//! # Protocol Overview
//!
//! Client messages (sent to server):
//! - setup - First frame: model, generation config, system instruction
//! - clientContent - Text turns appended to the conversation
//! - realtimeInput - base64 audio chunks from the microphone
//! - toolResponse - Results for earlier tool calls
//!
//! Server messages (received from server):
//! - setupComplete - Setup acknowledged
//! - serverContent - Transcriptions, model turn parts, interruption, turn end
//! - toolCall - Function call requests
//! - toolCallCancellation - Withdrawn function calls
//! - goAway - Server is about to drop the connection
//!
//! Server messages are not tagged by a `type` field; the kind is the single
//! top-level key present, so classification happens in [`LiveServerMessage::parse`].

use base64::prelude::*;
use bytes::Bytes;
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use super::config::{LIVE_DEFAULT_VOICE, normalize_model};
use crate::core::events::Event;
use crate::core::transcript::Speaker;
use crate::core::transport::{ControlMessage, SessionConfig};

// =============================================================================
// Client Messages
// =============================================================================

/// Initial `setup` frame.
///
/// Requests audio responses with both input and output audio transcription
/// enabled, which is what drives the transcript.
pub fn setup_message(config: &SessionConfig) -> ControlMessage {
    let voice = config.voice.as_deref().unwrap_or(LIVE_DEFAULT_VOICE);

    let mut setup = json!({
        "model": normalize_model(&config.model),
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "mediaResolution": "MEDIA_RESOLUTION_MEDIUM",
            "speechConfig": {
                "voiceConfig": {
                    "prebuiltVoiceConfig": { "voiceName": voice }
                }
            }
        },
        "inputAudioTranscription": {},
        "outputAudioTranscription": {},
    });

    if let Some(instructions) = config.instructions.as_deref()
        && let Some(object) = setup.as_object_mut()
    {
        object.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": instructions }] }),
        );
    }

    ControlMessage::new(json!({ "setup": setup }))
}

/// A user text turn.
pub fn client_content(text: &str, turn_complete: bool) -> ControlMessage {
    ControlMessage::new(json!({
        "clientContent": {
            "turns": [{ "role": "user", "parts": [{ "text": text }] }],
            "turnComplete": turn_complete,
        }
    }))
}

/// A chunk of PCM16 microphone audio.
pub fn realtime_audio(pcm: &[u8], sample_rate: u32) -> ControlMessage {
    ControlMessage::new(json!({
        "realtimeInput": {
            "mediaChunks": [{
                "mimeType": format!("audio/pcm;rate={sample_rate}"),
                "data": BASE64_STANDARD.encode(pcm),
            }]
        }
    }))
}

/// Results for earlier tool calls.
pub fn tool_response(function_responses: Vec<Value>) -> ControlMessage {
    ControlMessage::new(json!({
        "toolResponse": { "functionResponses": function_responses }
    }))
}

// =============================================================================
// Server Messages
// =============================================================================

/// Transcription fragment attached to server content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

/// Parts of a model turn. Kept as raw JSON so non-audio parts pass through intact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Value>,
}

/// Payload of a `serverContent` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    /// Set when the key is present, whatever its value
    #[serde(
        default,
        deserialize_with = "key_present",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
}

fn key_present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    IgnoredAny::deserialize(deserializer).map(|_| true)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    #[serde(default)]
    setup_complete: Option<Value>,
    #[serde(default)]
    tool_call: Option<Value>,
    #[serde(default)]
    tool_call_cancellation: Option<Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    go_away: Option<Value>,
}

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveServerMessage {
    SetupComplete,
    ToolCall(Value),
    ToolCallCancellation(Value),
    ServerContent(ServerContent),
    GoAway(Value),
    /// Valid JSON with no known top-level key
    Unrecognized(Value),
}

impl LiveServerMessage {
    /// Parse and classify a frame. Fails only when the frame is not a JSON object.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        let raw: RawServerMessage = serde_json::from_value(value.clone())?;

        Ok(if raw.setup_complete.is_some() {
            Self::SetupComplete
        } else if let Some(call) = raw.tool_call {
            Self::ToolCall(call)
        } else if let Some(cancellation) = raw.tool_call_cancellation {
            Self::ToolCallCancellation(cancellation)
        } else if let Some(content) = raw.server_content {
            Self::ServerContent(content)
        } else if let Some(go_away) = raw.go_away {
            Self::GoAway(go_away)
        } else {
            Self::Unrecognized(value)
        })
    }

    /// Events reported for this message, in emission order.
    pub fn into_events(self) -> Vec<Event> {
        match self {
            Self::SetupComplete => vec![Event::SetupComplete],
            Self::ToolCall(payload) => vec![Event::ToolCall { payload }],
            Self::ToolCallCancellation(payload) => vec![Event::ToolCallCancellation { payload }],
            Self::ServerContent(content) => content.into_events(),
            Self::GoAway(payload) => {
                tracing::warn!("Live server announced disconnect: {}", payload);
                Vec::new()
            }
            Self::Unrecognized(payload) => {
                tracing::debug!("Dropping unrecognized live message: {}", payload);
                Vec::new()
            }
        }
    }
}

fn is_audio_part(part: &Value) -> bool {
    part.pointer("/inlineData/mimeType")
        .and_then(Value::as_str)
        .is_some_and(|mime| mime.starts_with("audio/pcm"))
}

impl ServerContent {
    /// Map server content to events.
    ///
    /// Transcriptions come first. An interruption ends processing of the
    /// message. Audio parts become `AudioOut`, the rest one `Content`, and a
    /// completed turn is reported last.
    pub fn into_events(self) -> Vec<Event> {
        let mut events = Vec::new();

        let transcriptions = [
            (Speaker::User, self.input_transcription),
            (Speaker::Assistant, self.output_transcription),
        ];
        for (speaker, transcription) in transcriptions {
            if let Some(text) = transcription.and_then(|t| t.text)
                && !text.is_empty()
            {
                events.push(Event::TranscriptDelta { speaker, text });
            }
        }

        if self.interrupted {
            events.push(Event::Interrupted);
            return events;
        }

        if let Some(model_turn) = self.model_turn {
            let (audio, other): (Vec<Value>, Vec<Value>) =
                model_turn.parts.into_iter().partition(is_audio_part);

            for part in audio {
                let Some(data) = part.pointer("/inlineData/data").and_then(Value::as_str) else {
                    continue;
                };
                match BASE64_STANDARD.decode(data) {
                    Ok(pcm) => events.push(Event::AudioOut {
                        bytes: Bytes::from(pcm),
                    }),
                    Err(e) => tracing::warn!("Dropping undecodable audio part: {}", e),
                }
            }

            if !other.is_empty() {
                events.push(Event::Content {
                    payload: json!({ "modelTurn": { "parts": other } }),
                });
            }
        }

        if self.turn_complete.unwrap_or(false) {
            events.push(Event::TurnComplete);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_shape() {
        let config = SessionConfig {
            model: "gemini-live".to_string(),
            instructions: Some("Be brief.".to_string()),
            ..Default::default()
        };
        let setup = setup_message(&config);
        let value = setup.as_value();

        assert_eq!(value["setup"]["model"], "models/gemini-live");
        assert_eq!(
            value["setup"]["generationConfig"]["responseModalities"],
            json!(["AUDIO"])
        );
        assert_eq!(
            value["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Zephyr"
        );
        assert_eq!(
            value["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be brief."
        );
        assert_eq!(value["setup"]["inputAudioTranscription"], json!({}));
        assert_eq!(value["setup"]["outputAudioTranscription"], json!({}));
    }

    #[test]
    fn test_setup_without_instructions() {
        let setup = setup_message(&SessionConfig::default());
        assert!(setup.as_value()["setup"].get("systemInstruction").is_none());
    }

    #[test]
    fn test_realtime_audio_encoding() {
        let message = realtime_audio(&[1, 2, 3], 16000);
        let chunk = &message.as_value()["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], BASE64_STANDARD.encode([1u8, 2, 3]));
    }

    #[test]
    fn test_client_content() {
        let message = client_content("hello", true);
        let content = &message.as_value()["clientContent"];
        assert_eq!(content["turns"][0]["parts"][0]["text"], "hello");
        assert_eq!(content["turnComplete"], true);
    }

    #[test]
    fn test_classify_top_level_kinds() {
        assert_eq!(
            LiveServerMessage::parse(r#"{"setupComplete":{}}"#).unwrap(),
            LiveServerMessage::SetupComplete
        );
        assert!(matches!(
            LiveServerMessage::parse(r#"{"toolCall":{"functionCalls":[]}}"#).unwrap(),
            LiveServerMessage::ToolCall(_)
        ));
        assert!(matches!(
            LiveServerMessage::parse(r#"{"toolCallCancellation":{"ids":["a"]}}"#).unwrap(),
            LiveServerMessage::ToolCallCancellation(_)
        ));
        assert!(matches!(
            LiveServerMessage::parse(r#"{"goAway":{"timeLeft":"5s"}}"#).unwrap(),
            LiveServerMessage::GoAway(_)
        ));
        assert!(matches!(
            LiveServerMessage::parse(r#"{"somethingNew":1}"#).unwrap(),
            LiveServerMessage::Unrecognized(_)
        ));
        assert!(LiveServerMessage::parse("not json").is_err());
    }

    #[test]
    fn test_server_content_transcriptions() {
        let events = LiveServerMessage::parse(
            r#"{"serverContent":{"inputTranscription":{"text":"hi"},"outputTranscription":{"text":"hello"}}}"#,
        )
        .unwrap()
        .into_events();

        assert_eq!(
            events,
            vec![
                Event::TranscriptDelta {
                    speaker: Speaker::User,
                    text: "hi".to_string()
                },
                Event::TranscriptDelta {
                    speaker: Speaker::Assistant,
                    text: "hello".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_model_turn_splits_audio_and_content() {
        let audio = BASE64_STANDARD.encode([0u8, 1, 2, 3]);
        let frame = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": audio } },
                        { "text": "thinking" }
                    ]
                },
                "turnComplete": true
            }
        });

        let events = LiveServerMessage::parse(&frame.to_string())
            .unwrap()
            .into_events();

        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            Event::AudioOut {
                bytes: Bytes::from_static(&[0, 1, 2, 3])
            }
        );
        assert_eq!(
            events[1],
            Event::Content {
                payload: json!({ "modelTurn": { "parts": [{ "text": "thinking" }] } })
            }
        );
        assert_eq!(events[2], Event::TurnComplete);
    }

    #[test]
    fn test_interrupted_stops_processing() {
        let events = LiveServerMessage::parse(
            r#"{"serverContent":{"interrupted":true,"turnComplete":true}}"#,
        )
        .unwrap()
        .into_events();
        assert_eq!(events, vec![Event::Interrupted]);
    }

    #[test]
    fn test_interrupted_key_presence_is_enough() {
        for frame in [
            r#"{"serverContent":{"interrupted":false}}"#,
            r#"{"serverContent":{"interrupted":null,"turnComplete":true}}"#,
        ] {
            let events = LiveServerMessage::parse(frame).unwrap().into_events();
            assert_eq!(events, vec![Event::Interrupted], "frame: {frame}");
        }

        let events = LiveServerMessage::parse(r#"{"serverContent":{"turnComplete":true}}"#)
            .unwrap()
            .into_events();
        assert_eq!(events, vec![Event::TurnComplete]);
    }

    #[test]
    fn test_tool_call_answered_with_tool_response() {
        let frame = r#"{"toolCall":{"functionCalls":[{"id":"call_1","name":"lookup","args":{"q":"rain"}}]}}"#;
        let events = LiveServerMessage::parse(frame).unwrap().into_events();
        let [Event::ToolCall { payload }] = events.as_slice() else {
            panic!("expected one tool call, got {events:?}");
        };

        let responses = payload["functionCalls"]
            .as_array()
            .unwrap()
            .iter()
            .map(|call| {
                json!({
                    "id": call["id"],
                    "name": call["name"],
                    "response": { "output": "sunny" }
                })
            })
            .collect();
        let message = tool_response(responses);

        let sent = &message.as_value()["toolResponse"]["functionResponses"][0];
        assert_eq!(sent["id"], "call_1");
        assert_eq!(sent["name"], "lookup");
        assert_eq!(sent["response"]["output"], "sunny");
    }
}
