//! Audio pipes between the session and the audio device collaborators.
//!
//! Both directions use an unbounded FIFO of opaque byte buffers. Ordering is
//! queue order only; chunks carry no sequence numbers. The ingress pipe has no
//! backpressure, so a stalled forwarder accumulates memory.
//!
//! Barge-in handling lives on the consumer side: when [`BargeInFlag`] is
//! raised, the playback loop drains every queued egress chunk without playing
//! it and then clears the flag.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default poll interval of the playback loop.
pub const DEFAULT_PLAYBACK_POLL: Duration = Duration::from_millis(100);

/// Errors raised by playback sinks.
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("Playback failed: {0}")]
    Playback(String),
}

/// Create a connected writer/reader pair.
pub fn audio_pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PipeWriter { tx }, PipeReader { rx })
}

/// Non-blocking producer half. Cheap to clone and usable from any thread.
#[derive(Debug, Clone)]
pub struct PipeWriter {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl PipeWriter {
    /// Push a chunk. Returns `false` when the reader is gone.
    pub fn push(&self, chunk: Bytes) -> bool {
        self.tx.send(chunk).is_ok()
    }
}

/// Outcome of [`PipeReader::recv_timeout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeRecv {
    Chunk(Bytes),
    TimedOut,
    Closed,
}

/// Consumer half of an audio pipe.
#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl PipeReader {
    /// Wait for the next chunk; `None` once every writer is dropped.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Wait at most `wait` for the next chunk.
    pub async fn recv_timeout(&mut self, wait: Duration) -> PipeRecv {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(chunk)) => PipeRecv::Chunk(chunk),
            Ok(None) => PipeRecv::Closed,
            Err(_) => PipeRecv::TimedOut,
        }
    }

    /// Take a chunk only if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Discard every queued chunk and return how many were dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Number of chunks currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

// =============================================================================
// Barge-in
// =============================================================================

/// Shared barge-in signal.
///
/// The session's response receiver is the only writer that raises it and the
/// playback consumer is the only one that clears it.
#[derive(Debug, Clone, Default)]
pub struct BargeInFlag(Arc<AtomicBool>);

impl BargeInFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Playback
// =============================================================================

/// Destination for synthesized audio, e.g. a speaker or a WAV file.
#[async_trait]
pub trait PlaybackSink: Send {
    async fn play(&mut self, chunk: Bytes) -> Result<(), PipeError>;

    /// Called once when the playback loop exits.
    async fn finish(&mut self) -> Result<(), PipeError> {
        Ok(())
    }
}

/// Counters reported when the playback loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub played: usize,
    pub dropped: usize,
}

/// Drive `sink` from the egress pipe until cancelled or the pipe closes.
///
/// The loop wakes at least every `poll` to check the barge-in flag and the
/// stop token.
pub async fn run_playback<S: PlaybackSink>(
    mut reader: PipeReader,
    barge_in: BargeInFlag,
    mut sink: S,
    poll: Duration,
    cancel: CancellationToken,
) -> PlaybackStats {
    let mut stats = PlaybackStats::default();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if barge_in.is_raised() {
            let dropped = reader.drain();
            barge_in.clear();
            stats.dropped += dropped;
            debug!("Barge-in: dropped {} queued audio chunks", dropped);
            continue;
        }

        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = reader.recv_timeout(poll) => next,
        };

        match next {
            PipeRecv::Chunk(chunk) => {
                // The flag may have been raised while we were waiting.
                if barge_in.is_raised() {
                    stats.dropped += 1;
                    continue;
                }
                match sink.play(chunk).await {
                    Ok(()) => stats.played += 1,
                    Err(e) => warn!("Failed to play audio chunk: {}", e),
                }
            }
            PipeRecv::TimedOut => continue,
            PipeRecv::Closed => break,
        }
    }

    if let Err(e) = sink.finish().await {
        warn!("Failed to finish playback: {}", e);
    }
    stats
}
