//! Nova Sonic wire event types.
//!
//! Every message is one JSON object with a single `event` key wrapping exactly
//! one event body, e.g. `{"event": {"promptEnd": {"promptName": "..."}}}`.
//!
//! # Protocol Overview
//!
//! Client events (sent to the model):
//! - sessionStart / sessionEnd - Session boundaries
//! - promptStart / promptEnd - Prompt boundaries, output and tool configuration
//! - contentStart / contentEnd - AUDIO, TEXT or TOOL content segments
//! - audioInput - Base64 PCM chunk of the user audio segment
//! - textInput - Text content (system prompt)
//! - toolResult - JSON-encoded tool result
//!
//! Server events (received from the model):
//! - contentStart - Segment start with role and generation stage
//! - textOutput - Transcript or assistant text
//! - audioOutput - Base64 PCM chunk of synthesized speech
//! - toolUse - Tool invocation request
//! - contentEnd - Segment end; `type=TOOL` asks for the tool result
//! - completionEnd - No further output for this turn

use base64::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::config::{AudioFormat, InferenceConfig};
use crate::core::realtime::base::SpeakerRole;
use crate::core::tools::ToolSpec;

/// Text payload the model sends when the user interrupts playback.
pub const INTERRUPTION_MARKER: &str = r#"{ "interrupted" : true }"#;

/// Generation stage of provisional assistant text.
pub const SPECULATIVE_STAGE: &str = "SPECULATIVE";

const MEDIA_TYPE_TEXT: &str = "text/plain";
const MEDIA_TYPE_LPCM: &str = "audio/lpcm";
const MEDIA_TYPE_JSON: &str = "application/json";
const AUDIO_TYPE_SPEECH: &str = "SPEECH";
const ENCODING_BASE64: &str = "base64";

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while encoding or decoding wire events.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload is not JSON at all
    #[error("Malformed JSON: {0}")]
    Malformed(String),

    /// A recognized event whose body has the wrong shape
    #[error("Invalid {kind} event: {reason}")]
    InvalidEvent { kind: &'static str, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// =============================================================================
// Shared Types
// =============================================================================

/// Kind of a content segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    Audio,
    Text,
    Tool,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConfiguration {
    pub media_type: String,
}

impl MediaConfiguration {
    fn text() -> Self {
        Self {
            media_type: MEDIA_TYPE_TEXT.to_string(),
        }
    }
}

// =============================================================================
// Client Events (sent to the model)
// =============================================================================

/// Top-level wrapper of every wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: WireEvent,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    event: &'a WireEvent,
}

/// Events this crate sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireEvent {
    SessionStart(SessionStart),
    SessionEnd(SessionEnd),
    PromptStart(PromptStart),
    ContentStart(ContentStart),
    ContentEnd(ContentEnd),
    AudioInput(ContentPayload),
    TextInput(ContentPayload),
    ToolResult(ContentPayload),
    PromptEnd(PromptEnd),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStart {
    pub inference_configuration: InferenceConfig,
}

/// Serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnd {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStart {
    pub prompt_name: String,
    pub text_output_configuration: MediaConfiguration,
    pub audio_output_configuration: AudioOutputConfiguration,
    pub tool_use_output_configuration: MediaConfiguration,
    pub tool_configuration: ToolConfiguration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputConfiguration {
    pub media_type: String,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
    pub voice_id: String,
    pub encoding: String,
    pub audio_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfiguration {
    pub tools: Vec<ToolEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEntry {
    pub tool_spec: ToolSpecBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecBody {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

/// The schema travels as a JSON string, not a nested object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSchema {
    pub json: String,
}

impl From<&ToolSpec> for ToolEntry {
    fn from(spec: &ToolSpec) -> Self {
        ToolEntry {
            tool_spec: ToolSpecBody {
                name: spec.name.clone(),
                description: spec.description.clone(),
                input_schema: InputSchema {
                    json: spec.input_schema.to_string(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStart {
    pub prompt_name: String,
    pub content_name: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub interactive: bool,
    pub role: SpeakerRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_input_configuration: Option<AudioInputConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_input_configuration: Option<MediaConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result_input_configuration: Option<ToolResultInputConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInputConfiguration {
    pub media_type: String,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
    pub audio_type: String,
    pub encoding: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultInputConfiguration {
    pub tool_use_id: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub text_input_configuration: MediaConfiguration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEnd {
    pub prompt_name: String,
    pub content_name: String,
}

/// Body shared by `audioInput`, `textInput` and `toolResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPayload {
    pub prompt_name: String,
    pub content_name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptEnd {
    pub prompt_name: String,
}

impl WireEvent {
    pub fn session_start(inference: InferenceConfig) -> Self {
        WireEvent::SessionStart(SessionStart {
            inference_configuration: inference,
        })
    }

    pub fn session_end() -> Self {
        WireEvent::SessionEnd(SessionEnd {})
    }

    pub fn prompt_start(
        prompt_name: &str,
        output: AudioFormat,
        voice_id: &str,
        tools: &[ToolSpec],
    ) -> Self {
        WireEvent::PromptStart(PromptStart {
            prompt_name: prompt_name.to_string(),
            text_output_configuration: MediaConfiguration::text(),
            audio_output_configuration: AudioOutputConfiguration {
                media_type: MEDIA_TYPE_LPCM.to_string(),
                sample_rate_hertz: output.sample_rate_hertz,
                sample_size_bits: output.sample_size_bits,
                channel_count: output.channel_count,
                voice_id: voice_id.to_string(),
                encoding: ENCODING_BASE64.to_string(),
                audio_type: AUDIO_TYPE_SPEECH.to_string(),
            },
            tool_use_output_configuration: MediaConfiguration {
                media_type: MEDIA_TYPE_JSON.to_string(),
            },
            tool_configuration: ToolConfiguration {
                tools: tools.iter().map(ToolEntry::from).collect(),
            },
        })
    }

    pub fn text_content_start(prompt_name: &str, content_name: &str, role: SpeakerRole) -> Self {
        WireEvent::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Text,
            interactive: true,
            role,
            audio_input_configuration: None,
            text_input_configuration: Some(MediaConfiguration::text()),
            tool_result_input_configuration: None,
        })
    }

    pub fn audio_content_start(prompt_name: &str, content_name: &str, input: AudioFormat) -> Self {
        WireEvent::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Audio,
            interactive: true,
            role: SpeakerRole::User,
            audio_input_configuration: Some(AudioInputConfiguration {
                media_type: MEDIA_TYPE_LPCM.to_string(),
                sample_rate_hertz: input.sample_rate_hertz,
                sample_size_bits: input.sample_size_bits,
                channel_count: input.channel_count,
                audio_type: AUDIO_TYPE_SPEECH.to_string(),
                encoding: ENCODING_BASE64.to_string(),
            }),
            text_input_configuration: None,
            tool_result_input_configuration: None,
        })
    }

    pub fn tool_content_start(prompt_name: &str, content_name: &str, tool_use_id: &str) -> Self {
        WireEvent::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Tool,
            interactive: false,
            role: SpeakerRole::Tool,
            audio_input_configuration: None,
            text_input_configuration: None,
            tool_result_input_configuration: Some(ToolResultInputConfiguration {
                tool_use_id: tool_use_id.to_string(),
                content_type: ContentType::Text,
                text_input_configuration: MediaConfiguration::text(),
            }),
        })
    }

    pub fn content_end(prompt_name: &str, content_name: &str) -> Self {
        WireEvent::ContentEnd(ContentEnd {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
        })
    }

    /// Audio input carrying `audio` as base64.
    pub fn audio_input(prompt_name: &str, content_name: &str, audio: &[u8]) -> Self {
        WireEvent::AudioInput(ContentPayload {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content: BASE64_STANDARD.encode(audio),
        })
    }

    pub fn text_input(prompt_name: &str, content_name: &str, text: &str) -> Self {
        WireEvent::TextInput(ContentPayload {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content: text.to_string(),
        })
    }

    /// Tool result carrying `result` serialized as a JSON string.
    pub fn tool_result(prompt_name: &str, content_name: &str, result: &Value) -> Self {
        let content = match result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        WireEvent::ToolResult(ContentPayload {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content,
        })
    }

    pub fn prompt_end(prompt_name: &str) -> Self {
        WireEvent::PromptEnd(PromptEnd {
            prompt_name: prompt_name.to_string(),
        })
    }

    /// Wire name of the event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            WireEvent::SessionStart(_) => "sessionStart",
            WireEvent::SessionEnd(_) => "sessionEnd",
            WireEvent::PromptStart(_) => "promptStart",
            WireEvent::ContentStart(_) => "contentStart",
            WireEvent::ContentEnd(_) => "contentEnd",
            WireEvent::AudioInput(_) => "audioInput",
            WireEvent::TextInput(_) => "textInput",
            WireEvent::ToolResult(_) => "toolResult",
            WireEvent::PromptEnd(_) => "promptEnd",
        }
    }
}

/// Encode a client event to its wire JSON.
pub fn encode(event: &WireEvent) -> Result<String, CodecError> {
    serde_json::to_string(&EnvelopeRef { event })
        .map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decode a client event, e.g. from recorded traffic.
pub fn decode_outbound(text: &str) -> Result<WireEvent, CodecError> {
    serde_json::from_str::<Envelope>(text)
        .map(|envelope| envelope.event)
        .map_err(|e| CodecError::Malformed(e.to_string()))
}

// =============================================================================
// Server Events (received from the model)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundContentStart {
    pub role: SpeakerRole,
    #[serde(default, rename = "type")]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub content_id: Option<String>,
    /// JSON document encoded as a string
    #[serde(default)]
    pub additional_model_fields: Option<String>,
}

impl InboundContentStart {
    /// Whether the segment is provisional assistant text.
    ///
    /// Absent metadata is not speculative; unparseable metadata is an error.
    pub fn is_speculative(&self) -> Result<bool, serde_json::Error> {
        let Some(fields) = self.additional_model_fields.as_deref() else {
            return Ok(false);
        };
        let fields: Value = serde_json::from_str(fields)?;
        Ok(fields.get("generationStage").and_then(Value::as_str) == Some(SPECULATIVE_STAGE))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOutput {
    pub content: String,
    #[serde(default)]
    pub role: Option<SpeakerRole>,
}

impl TextOutput {
    pub fn is_interruption(&self) -> bool {
        self.content.contains(INTERRUPTION_MARKER)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutput {
    pub content: String,
}

impl AudioOutput {
    pub fn decode_audio(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(&self.content)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUse {
    pub tool_name: String,
    pub tool_use_id: String,
    /// Arguments as a JSON string
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundContentEnd {
    #[serde(default, rename = "type")]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Decoded server event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ContentStart(InboundContentStart),
    TextOutput(TextOutput),
    AudioOutput(AudioOutput),
    ToolUse(ToolUse),
    ContentEnd(InboundContentEnd),
    CompletionEnd,
    /// No `event` object, or no key this crate handles
    Unrecognized,
}

/// A server message: the typed event plus the JSON it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub event: InboundEvent,
    pub raw: Value,
}

/// Decode one server message.
///
/// Unknown keys are tolerated. When several known keys are present the first
/// of contentStart, textOutput, audioOutput, toolUse, contentEnd,
/// completionEnd wins.
pub fn decode_inbound(text: &str) -> Result<InboundMessage, CodecError> {
    let raw: Value = serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let event = match raw.get("event").and_then(Value::as_object) {
        Some(body) => classify(body)?,
        None => InboundEvent::Unrecognized,
    };

    Ok(InboundMessage { event, raw })
}

fn classify(body: &serde_json::Map<String, Value>) -> Result<InboundEvent, CodecError> {
    if let Some(v) = body.get("contentStart") {
        return typed("contentStart", v).map(InboundEvent::ContentStart);
    }
    if let Some(v) = body.get("textOutput") {
        return typed("textOutput", v).map(InboundEvent::TextOutput);
    }
    if let Some(v) = body.get("audioOutput") {
        return typed("audioOutput", v).map(InboundEvent::AudioOutput);
    }
    if let Some(v) = body.get("toolUse") {
        return typed("toolUse", v).map(InboundEvent::ToolUse);
    }
    if let Some(v) = body.get("contentEnd") {
        return typed("contentEnd", v).map(InboundEvent::ContentEnd);
    }
    if body.contains_key("completionEnd") {
        return Ok(InboundEvent::CompletionEnd);
    }
    Ok(InboundEvent::Unrecognized)
}

fn typed<T: DeserializeOwned>(kind: &'static str, value: &Value) -> Result<T, CodecError> {
    T::deserialize(value).map_err(|e| CodecError::InvalidEvent {
        kind,
        reason: e.to_string(),
    })
}
