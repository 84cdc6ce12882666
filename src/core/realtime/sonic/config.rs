//! Configuration for a Nova Sonic streaming session.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::realtime::pipe::DEFAULT_PLAYBACK_POLL;

// =============================================================================
// Constants
// =============================================================================

/// Default Bedrock model identifier.
pub const DEFAULT_MODEL_ID: &str = "amazon.nova-sonic-v1:0";

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default output voice.
pub const DEFAULT_VOICE_ID: &str = "matthew";

/// Microphone sample rate in Hz.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Synthesized audio sample rate in Hz.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Mono audio in both directions.
pub const CHANNELS: u32 = 1;

/// 16-bit signed little-endian PCM.
pub const SAMPLE_SIZE_BITS: u32 = 16;

/// Frames per captured buffer.
pub const CHUNK_SIZE: usize = 1024;

/// Delay between bootstrap events.
pub const DEFAULT_EVENT_PACING: Duration = Duration::from_millis(100);

pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TOP_P: f64 = 0.9;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// System prompt sent as the first text content of every session.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friend. The user and you will engage in a \
spoken dialog exchanging the transcripts of a natural real-time conversation.\n\
When reading order numbers, please read each digit individually, separated by pauses. For \
example, order #1234 should be read as 'order number one-two-three-four' rather than 'order \
number one thousand two hundred thirty-four'.";

// =============================================================================
// Configuration Types
// =============================================================================

/// Sampling parameters sent in `sessionStart`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    pub max_tokens: u32,
    pub top_p: f64,
    pub temperature: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Raw PCM format of one audio direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
}

impl AudioFormat {
    pub const fn input() -> Self {
        Self {
            sample_rate_hertz: INPUT_SAMPLE_RATE,
            sample_size_bits: SAMPLE_SIZE_BITS,
            channel_count: CHANNELS,
        }
    }

    pub const fn output() -> Self {
        Self {
            sample_rate_hertz: OUTPUT_SAMPLE_RATE,
            sample_size_bits: SAMPLE_SIZE_BITS,
            channel_count: CHANNELS,
        }
    }

    /// Bytes per frame across all channels.
    pub fn frame_bytes(&self) -> usize {
        (self.sample_size_bits as usize / 8) * self.channel_count as usize
    }
}

/// Everything a [`StreamSession`](super::StreamSession) needs at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub inference: InferenceConfig,
    pub voice_id: String,
    pub system_prompt: String,
    pub input_audio: AudioFormat,
    pub output_audio: AudioFormat,
    /// Delay inserted between bootstrap events
    pub event_pacing: Duration,
    /// Poll interval of the egress playback loop
    pub playback_poll: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inference: InferenceConfig::default(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            input_audio: AudioFormat::input(),
            output_audio: AudioFormat::output(),
            event_pacing: DEFAULT_EVENT_PACING,
            playback_poll: DEFAULT_PLAYBACK_POLL,
        }
    }
}
