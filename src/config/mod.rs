//! Configuration module for the sonic bridge
//!
//! This module handles configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Environment Variables
//! - `SONIC_TRANSPORT` - `bedrock` (default) or `websocket`
//! - `SONIC_WS_URL` - WebSocket endpoint for the `websocket` transport
//! - `SONIC_REGION` / `AWS_REGION` - AWS region
//! - `SONIC_MODEL_ID` - Bedrock model id
//! - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN`
//! - `SONIC_VOICE_ID`, `SONIC_SYSTEM_PROMPT`
//! - `SONIC_MAX_TOKENS`, `SONIC_TOP_P`, `SONIC_TEMPERATURE`
//! - `SONIC_EVENT_PACING_MS`, `SONIC_PLAYBACK_POLL_MS`
//! - `SONIC_INPUT_SAMPLE_RATE`, `SONIC_OUTPUT_SAMPLE_RATE`, `SONIC_CHUNK_SIZE`
//! - `SONIC_DEBUG`
//!
//! # Example
//! ```rust,no_run
//! use sonic_bridge::config::BridgeConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BridgeConfig::from_file(Path::new("sonic.yaml"))?;
//! println!("Using model {} in {}", config.model_id, config.region);
//! # Ok(())
//! # }
//! ```

mod yaml;

use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::core::realtime::sonic::{
    AudioFormat, CHANNELS, CHUNK_SIZE, DEFAULT_EVENT_PACING, DEFAULT_MAX_TOKENS, DEFAULT_MODEL_ID,
    DEFAULT_REGION, DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE, DEFAULT_TOP_P, DEFAULT_VOICE_ID,
    INPUT_SAMPLE_RATE, InferenceConfig, OUTPUT_SAMPLE_RATE, SAMPLE_SIZE_BITS, SessionConfig,
};
use crate::core::realtime::pipe::DEFAULT_PLAYBACK_POLL;
use crate::core::realtime::transport::TransportKind;

pub use yaml::YamlConfig;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Bridge configuration
///
/// Contains everything needed to run a session from the command line:
/// - Transport selection and endpoint
/// - AWS region, model and optional explicit credentials
/// - Session parameters (voice, system prompt, sampling)
/// - Audio format and pacing
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub transport: TransportKind,
    pub ws_url: Option<String>,

    // AWS settings
    pub region: String,
    pub model_id: String,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_session_token: Option<String>,

    // Session settings
    pub voice_id: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub top_p: f64,
    pub temperature: f64,
    pub event_pacing_ms: u64,

    // Audio settings
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub chunk_size: usize,
    pub playback_poll_ms: u64,

    pub debug: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            ws_url: None,
            region: DEFAULT_REGION.to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_session_token: None,
            voice_id: DEFAULT_VOICE_ID.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
            temperature: DEFAULT_TEMPERATURE,
            event_pacing_ms: DEFAULT_EVENT_PACING.as_millis() as u64,
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            chunk_size: CHUNK_SIZE,
            playback_poll_ms: DEFAULT_PLAYBACK_POLL.as_millis() as u64,
            debug: false,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables
    ///
    /// The .env file is loaded in main.rs, so its values arrive here as
    /// environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::load(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file on top of the environment
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(Some(path))?;
        config.validate()?;
        Ok(config)
    }

    /// Merge defaults, environment and the optional YAML file without
    /// validating, so callers can layer further overrides first.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::default().with_env()?;
        match path {
            Some(path) => config.with_yaml(YamlConfig::from_file(path)?),
            None => Ok(config),
        }
    }

    fn with_env(mut self) -> Result<Self, ConfigError> {
        if let Some(kind) = env_var("SONIC_TRANSPORT") {
            self.transport = parse_transport("SONIC_TRANSPORT", &kind)?;
        }
        if let Some(url) = env_var("SONIC_WS_URL") {
            self.ws_url = Some(url);
        }
        if let Some(region) = env_var("SONIC_REGION").or_else(|| env_var("AWS_REGION")) {
            self.region = region;
        }
        if let Some(model_id) = env_var("SONIC_MODEL_ID") {
            self.model_id = model_id;
        }
        self.aws_access_key_id = env_var("AWS_ACCESS_KEY_ID").or(self.aws_access_key_id);
        self.aws_secret_access_key = env_var("AWS_SECRET_ACCESS_KEY").or(self.aws_secret_access_key);
        self.aws_session_token = env_var("AWS_SESSION_TOKEN").or(self.aws_session_token);

        if let Some(voice_id) = env_var("SONIC_VOICE_ID") {
            self.voice_id = voice_id;
        }
        if let Some(prompt) = env_var("SONIC_SYSTEM_PROMPT") {
            self.system_prompt = prompt;
        }
        if let Some(v) = parse_env("SONIC_MAX_TOKENS")? {
            self.max_tokens = v;
        }
        if let Some(v) = parse_env("SONIC_TOP_P")? {
            self.top_p = v;
        }
        if let Some(v) = parse_env("SONIC_TEMPERATURE")? {
            self.temperature = v;
        }
        if let Some(v) = parse_env("SONIC_EVENT_PACING_MS")? {
            self.event_pacing_ms = v;
        }
        if let Some(v) = parse_env("SONIC_INPUT_SAMPLE_RATE")? {
            self.input_sample_rate = v;
        }
        if let Some(v) = parse_env("SONIC_OUTPUT_SAMPLE_RATE")? {
            self.output_sample_rate = v;
        }
        if let Some(v) = parse_env("SONIC_CHUNK_SIZE")? {
            self.chunk_size = v;
        }
        if let Some(v) = parse_env("SONIC_PLAYBACK_POLL_MS")? {
            self.playback_poll_ms = v;
        }
        if let Some(v) = env_var("SONIC_DEBUG") {
            self.debug = parse_bool("SONIC_DEBUG", &v)?;
        }
        Ok(self)
    }

    fn with_yaml(mut self, yaml: YamlConfig) -> Result<Self, ConfigError> {
        if let Some(debug) = yaml.debug {
            self.debug = debug;
        }

        if let Some(aws) = yaml.aws {
            if let Some(region) = aws.region {
                self.region = region;
            }
            if let Some(model_id) = aws.model_id {
                self.model_id = model_id;
            }
            self.aws_access_key_id = aws.access_key_id.or(self.aws_access_key_id);
            self.aws_secret_access_key = aws.secret_access_key.or(self.aws_secret_access_key);
            self.aws_session_token = aws.session_token.or(self.aws_session_token);
        }

        if let Some(transport) = yaml.transport {
            if let Some(kind) = transport.kind {
                self.transport = parse_transport("transport.kind", &kind)?;
            }
            self.ws_url = transport.websocket_url.or(self.ws_url);
        }

        if let Some(session) = yaml.session {
            if let Some(voice_id) = session.voice_id {
                self.voice_id = voice_id;
            }
            if let Some(prompt) = session.system_prompt {
                self.system_prompt = prompt;
            }
            self.max_tokens = session.max_tokens.unwrap_or(self.max_tokens);
            self.top_p = session.top_p.unwrap_or(self.top_p);
            self.temperature = session.temperature.unwrap_or(self.temperature);
            self.event_pacing_ms = session.event_pacing_ms.unwrap_or(self.event_pacing_ms);
        }

        if let Some(audio) = yaml.audio {
            self.input_sample_rate = audio.input_sample_rate.unwrap_or(self.input_sample_rate);
            self.output_sample_rate = audio.output_sample_rate.unwrap_or(self.output_sample_rate);
            self.chunk_size = audio.chunk_size.unwrap_or(self.chunk_size);
            self.playback_poll_ms = audio.playback_poll_ms.unwrap_or(self.playback_poll_ms);
        }

        Ok(self)
    }

    /// Check ranges and cross-field requirements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "sample rates must be greater than zero".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ConfigError::Invalid(format!(
                "top_p must be within 0..=1, got {}",
                self.top_p
            )));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature must be within 0..=1, got {}",
                self.temperature
            )));
        }
        if self.transport == TransportKind::WebSocket && self.ws_url.is_none() {
            return Err(ConfigError::Invalid(
                "the websocket transport requires SONIC_WS_URL or transport.websocket_url"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Build the session configuration.
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            inference: InferenceConfig {
                max_tokens: self.max_tokens,
                top_p: self.top_p,
                temperature: self.temperature,
            },
            voice_id: self.voice_id.clone(),
            system_prompt: self.system_prompt.clone(),
            input_audio: AudioFormat {
                sample_rate_hertz: self.input_sample_rate,
                sample_size_bits: SAMPLE_SIZE_BITS,
                channel_count: CHANNELS,
            },
            output_audio: AudioFormat {
                sample_rate_hertz: self.output_sample_rate,
                sample_size_bits: SAMPLE_SIZE_BITS,
                channel_count: CHANNELS,
            },
            event_pacing: Duration::from_millis(self.event_pacing_ms),
            playback_poll: Duration::from_millis(self.playback_poll_ms),
        }
    }

    /// Whether explicit AWS keys are configured.
    pub fn has_explicit_aws_credentials(&self) -> bool {
        self.aws_access_key_id.is_some() && self.aws_secret_access_key.is_some()
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    env_var(key)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            })
        })
        .transpose()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_transport(key: &str, value: &str) -> Result<TransportKind, ConfigError> {
    TransportKind::parse(value).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
