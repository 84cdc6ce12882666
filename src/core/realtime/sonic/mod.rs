//! Amazon Nova Sonic speech-to-speech session.
//!
//! # Audio Format
//!
//! - Input: PCM 16-bit signed little-endian, 16kHz, mono
//! - Output: PCM 16-bit signed little-endian, 24kHz, mono

mod client;
mod config;
pub mod messages;

pub use client::{AudioSegment, StreamSession};
pub use config::{
    AudioFormat, CHANNELS, CHUNK_SIZE, DEFAULT_EVENT_PACING, DEFAULT_MAX_TOKENS, DEFAULT_MODEL_ID,
    DEFAULT_REGION, DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE, DEFAULT_TOP_P, DEFAULT_VOICE_ID,
    INPUT_SAMPLE_RATE, InferenceConfig, OUTPUT_SAMPLE_RATE, SAMPLE_SIZE_BITS, SessionConfig,
};
pub use messages::{CodecError, InboundEvent, InboundMessage, WireEvent};
