//! Engine configuration.
//!
//! Configuration comes from environment variables (optionally seeded from a
//! `.env` file by the binary) and an optional YAML file.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |---|---|
//! | `VOICE_TRANSPORT` | `native-live` or `webrtc` |
//! | `VOICE_CREDENTIAL_URL` | credential endpoint |
//! | `VOICE_CREDENTIAL_AUTH_TOKEN` | bearer token for the credential endpoint |
//! | `VOICE_NEGOTIATION_URL` | SDP negotiation endpoint |
//! | `VOICE_LIVE_URL` | live-connect WebSocket endpoint |
//! | `VOICE_MODEL` | model id |
//! | `VOICE_VOICE` | prebuilt voice |
//! | `VOICE_INSTRUCTIONS` | system instructions |
//! | `VOICE_GREETING` | opening prompt |
//! | `VOICE_TRANSCRIPTION_MODEL` | input transcription model |
//! | `VOICE_USER_LABEL` / `VOICE_ASSISTANT_LABEL` | transcript labels |
//!
//! # Example
//! ```rust,no_run
//! use duplex_voice::config::EngineConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = EngineConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = EngineConfig::from_file(Path::new("voice.yaml"))?;
//! println!("{}", config.redacted());
//! # Ok(())
//! # }
//! ```

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::transcript::SpeakerLabels;
use crate::core::transport::live::{LIVE_DEFAULT_MODEL, LIVE_DEFAULT_URL};
use crate::core::transport::webrtc::{DEFAULT_NEGOTIATION_URL, DEFAULT_REALTIME_MODEL};
use crate::core::transport::{SessionConfig, TransportKind};

mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Credential endpoint served next to the UI by default.
pub const DEFAULT_CREDENTIAL_URL: &str = "http://localhost:3000/api/auth-token";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },

    #[error("Invalid URL for {field} ('{url}'): {message}")]
    InvalidUrl {
        field: &'static str,
        url: String,
        message: String,
    },
}

/// Complete engine configuration.
#[derive(Clone, PartialEq)]
pub struct EngineConfig {
    pub transport: TransportKind,
    pub credential_url: String,
    /// Bearer token presented to the credential endpoint, if it requires one
    pub credential_auth_token: Option<String>,
    pub negotiation_url: String,
    pub live_url: String,
    pub session: SessionConfig,
    pub labels: SpeakerLabels,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            credential_url: DEFAULT_CREDENTIAL_URL.to_string(),
            credential_auth_token: None,
            negotiation_url: DEFAULT_NEGOTIATION_URL.to_string(),
            live_url: LIVE_DEFAULT_URL.to_string(),
            session: SessionConfig {
                model: default_model(TransportKind::default()).to_string(),
                ..Default::default()
            },
            labels: SpeakerLabels::default(),
        }
    }
}

/// Implement Drop to zeroize the secret field when EngineConfig is dropped.
impl Drop for EngineConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut token) = self.credential_auth_token {
            token.zeroize();
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("transport", &self.transport)
            .field("credential_url", &self.credential_url)
            .field(
                "credential_auth_token",
                &self.credential_auth_token.as_ref().map(|_| "<redacted>"),
            )
            .field("negotiation_url", &self.negotiation_url)
            .field("live_url", &self.live_url)
            .field("session", &self.session)
            .field("labels", &self.labels)
            .finish()
    }
}

fn default_model(kind: TransportKind) -> &'static str {
    match kind {
        TransportKind::NativeLive => LIVE_DEFAULT_MODEL,
        TransportKind::WebRtc => DEFAULT_REALTIME_MODEL,
    }
}

/// Read a variable, treating empty values as unset.
fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_transport(value: &str) -> Result<TransportKind, ConfigError> {
    value
        .parse::<TransportKind>()
        .map_err(|message| ConfigError::InvalidValue {
            field: "transport",
            message,
        })
}

impl EngineConfig {
    /// Load configuration from environment variables over defaults, then validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::merge(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file over the environment-derived configuration, then validate.
    ///
    /// `.env` is loaded by the binary at startup, so actual environment
    /// variables already override `.env` values by the time this runs.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        let config = Self::merge(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn merge(yaml: Option<YamlConfig>) -> Result<Self, ConfigError> {
        let yaml = yaml.unwrap_or_default();
        let endpoints = yaml.endpoints.unwrap_or_default();
        let session = yaml.session.unwrap_or_default();
        let transcript = yaml.transcript.unwrap_or_default();

        let transport = match yaml.transport.or_else(|| env_var("VOICE_TRANSPORT")) {
            Some(value) => parse_transport(&value)?,
            None => TransportKind::default(),
        };

        let defaults = SpeakerLabels::default();

        Ok(Self {
            transport,
            credential_url: endpoints
                .credential_url
                .or_else(|| env_var("VOICE_CREDENTIAL_URL"))
                .unwrap_or_else(|| DEFAULT_CREDENTIAL_URL.to_string()),
            credential_auth_token: endpoints
                .credential_auth_token
                .or_else(|| env_var("VOICE_CREDENTIAL_AUTH_TOKEN")),
            negotiation_url: endpoints
                .negotiation_url
                .or_else(|| env_var("VOICE_NEGOTIATION_URL"))
                .unwrap_or_else(|| DEFAULT_NEGOTIATION_URL.to_string()),
            live_url: endpoints
                .live_url
                .or_else(|| env_var("VOICE_LIVE_URL"))
                .unwrap_or_else(|| LIVE_DEFAULT_URL.to_string()),
            session: SessionConfig {
                model: session
                    .model
                    .or_else(|| env_var("VOICE_MODEL"))
                    .unwrap_or_else(|| default_model(transport).to_string()),
                voice: session.voice.or_else(|| env_var("VOICE_VOICE")),
                instructions: session
                    .instructions
                    .or_else(|| env_var("VOICE_INSTRUCTIONS")),
                greeting: session.greeting.or_else(|| env_var("VOICE_GREETING")),
                input_transcription_model: session
                    .input_transcription_model
                    .or_else(|| env_var("VOICE_TRANSCRIPTION_MODEL")),
            },
            labels: SpeakerLabels {
                user: transcript
                    .user_label
                    .or_else(|| env_var("VOICE_USER_LABEL"))
                    .unwrap_or(defaults.user),
                assistant: transcript
                    .assistant_label
                    .or_else(|| env_var("VOICE_ASSISTANT_LABEL"))
                    .unwrap_or(defaults.assistant),
            },
        })
    }

    /// Validate endpoints and required fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate_url("credential_url", &self.credential_url, &["http", "https"])?;
        validation::validate_url(
            "negotiation_url",
            &self.negotiation_url,
            &["http", "https"],
        )?;
        validation::validate_url("live_url", &self.live_url, &["ws", "wss"])?;
        validation::validate_non_empty("model", &self.session.model)?;
        validation::validate_non_empty("user_label", &self.labels.user)?;
        validation::validate_non_empty("assistant_label", &self.labels.assistant)?;
        Ok(())
    }

    /// Human-readable summary with secrets masked.
    pub fn redacted(&self) -> String {
        let optional = |value: &Option<String>| value.as_deref().unwrap_or("-").to_string();
        let token = if self.credential_auth_token.is_some() {
            "<redacted>"
        } else {
            "-"
        };

        [
            format!("transport:             {}", self.transport),
            format!("credential_url:        {}", self.credential_url),
            format!("credential_auth_token: {token}"),
            format!("negotiation_url:       {}", self.negotiation_url),
            format!("live_url:              {}", self.live_url),
            format!("model:                 {}", self.session.model),
            format!("voice:                 {}", optional(&self.session.voice)),
            format!("instructions:          {}", optional(&self.session.instructions)),
            format!("greeting:              {}", optional(&self.session.greeting)),
            format!(
                "transcription_model:   {}",
                optional(&self.session.input_transcription_model)
            ),
            format!(
                "labels:                {} / {}",
                self.labels.user, self.labels.assistant
            ),
        ]
        .join("\n")
    }
}
