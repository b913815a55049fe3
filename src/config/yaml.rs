use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional so a file can override just part of the
/// environment-derived configuration.
///
/// # Example YAML structure
/// ```yaml
/// transport: "webrtc"
///
/// endpoints:
///   credential_url: "https://app.example.com/api/realtime/session"
///   credential_auth_token: "internal-token"
///   negotiation_url: "https://api.openai.com/v1/realtime"
///   live_url: "wss://generativelanguage.googleapis.com/ws/..."
///
/// session:
///   model: "gpt-realtime"
///   voice: "alloy"
///   instructions: "You are a friendly listener."
///   greeting: "Say hello and invite the user to talk."
///   input_transcription_model: "whisper-1"
///
/// transcript:
///   user_label: "You"
///   assistant_label: "AI"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub transport: Option<String>,
    pub endpoints: Option<EndpointsYaml>,
    pub session: Option<SessionYaml>,
    pub transcript: Option<TranscriptYaml>,
}

/// Remote endpoints from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EndpointsYaml {
    pub credential_url: Option<String>,
    pub credential_auth_token: Option<String>,
    pub negotiation_url: Option<String>,
    pub live_url: Option<String>,
}

/// Session parameters from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub greeting: Option<String>,
    pub input_transcription_model: Option<String>,
}

/// Transcript rendering from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TranscriptYaml {
    pub user_label: Option<String>,
    pub assistant_label: Option<String>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid YAML
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
