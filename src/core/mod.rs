pub mod audio;
pub mod realtime;
pub mod tools;

// Re-export commonly used types for convenience
pub use audio::{AudioError, WavPlaybackSink, read_pcm16_wav, stream_wav_file};

pub use realtime::{
    LifecycleState, SessionConfig, SessionError, SessionOutput, SessionResult, SpeakerRole,
    StreamSession, TransportConnector, TransportError, TransportKind,
};

pub use tools::{ToolDispatcher, ToolError, ToolHandler, ToolSpec};
