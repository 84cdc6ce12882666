//! Realtime speech-to-speech sessions.
//!
//! This module provides the streaming session manager for bidirectional
//! speech models, the audio pipes it shares with device collaborators, and
//! the transports that carry its wire events.
//!
//! # Architecture
//!
//! - `StreamSession` owns lifecycle, identifiers, and the background tasks
//! - `TransportConnector` opens the duplex channel the session talks over
//! - Audio enters through `enqueue_audio_chunk` and leaves through the egress
//!   `PipeReader`, which the playback loop drains on barge-in
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sonic_bridge::core::realtime::{SessionConfig, SessionOutput, StreamSession};
//! use sonic_bridge::core::realtime::transport::websocket::WebSocketConnector;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let connector = Arc::new(WebSocketConnector::new("ws://127.0.0.1:9000")?);
//!     let session = StreamSession::new(SessionConfig::default(), connector);
//!     let mut output = session.take_output_receiver().unwrap();
//!
//!     session.initialize().await?;
//!     session.start_audio_content().await?;
//!
//!     while let Some(event) = output.recv().await {
//!         if let SessionOutput::Transcript { role, text } = event {
//!             println!("{}: {}", role, text);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod base;
pub mod pipe;
pub mod sonic;
pub mod transport;

pub use base::{
    LifecycleState, SessionError, SessionOutput, SessionResult, SpeakerRole, StateCell,
};
pub use pipe::{
    BargeInFlag, DEFAULT_PLAYBACK_POLL, PipeError, PipeReader, PipeRecv, PipeWriter,
    PlaybackSink, PlaybackStats, audio_pipe, run_playback,
};
pub use sonic::{AudioFormat, AudioSegment, InferenceConfig, SessionConfig, StreamSession};
pub use transport::{
    DuplexChannel, EventSink, EventSource, TransportConnector, TransportError, TransportKind,
    TransportResult,
};
