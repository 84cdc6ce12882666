use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional so a file may configure only what it needs.
/// Values present here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// debug: false
///
/// aws:
///   region: "us-east-1"
///   model_id: "amazon.nova-sonic-v1:0"
///   access_key_id: "AKIA..."
///   secret_access_key: "..."
///
/// transport:
///   kind: "websocket"
///   websocket_url: "ws://127.0.0.1:9000/sonic"
///
/// session:
///   voice_id: "matthew"
///   system_prompt: "You are a friend."
///   max_tokens: 1024
///   top_p: 0.9
///   temperature: 0.7
///   event_pacing_ms: 100
///
/// audio:
///   input_sample_rate: 16000
///   output_sample_rate: 24000
///   chunk_size: 1024
///   playback_poll_ms: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub debug: Option<bool>,
    pub aws: Option<AwsYaml>,
    pub transport: Option<TransportYaml>,
    pub session: Option<SessionYaml>,
    pub audio: Option<AudioYaml>,
}

/// AWS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AwsYaml {
    pub region: Option<String>,
    pub model_id: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

/// Transport configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TransportYaml {
    pub kind: Option<String>,
    pub websocket_url: Option<String>,
}

/// Session configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub voice_id: Option<String>,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub temperature: Option<f64>,
    pub event_pacing_ms: Option<u64>,
}

/// Audio configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub input_sample_rate: Option<u32>,
    pub output_sample_rate: Option<u32>,
    pub chunk_size: Option<usize>,
    pub playback_poll_ms: Option<u64>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
