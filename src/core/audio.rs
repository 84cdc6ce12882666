//! WAV file capture and playback.
//!
//! Stands in for microphone and speaker devices: a mono PCM16 WAV file is
//! streamed into a session at real-time pace, and egress audio is written to
//! another WAV file.

use async_trait::async_trait;
use bytes::Bytes;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::realtime::sonic::{AudioFormat, StreamSession};
use crate::core::realtime::{PipeError, PlaybackSink, SessionError};

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported audio format: {0}")]
    Format(String),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Read a WAV file as little-endian PCM16 bytes.
///
/// The file must be 16-bit integer PCM with the channel count and sample rate
/// of `expected`.
pub fn read_pcm16_wav(path: &Path, expected: &AudioFormat) -> Result<Vec<u8>, AudioError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(AudioError::Format(format!(
            "expected 16-bit integer PCM, got {} bits {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    if u32::from(spec.channels) != expected.channel_count {
        return Err(AudioError::Format(format!(
            "expected {} channel(s), got {}",
            expected.channel_count, spec.channels
        )));
    }
    if spec.sample_rate != expected.sample_rate_hertz {
        return Err(AudioError::Format(format!(
            "expected {} Hz, got {} Hz",
            expected.sample_rate_hertz, spec.sample_rate
        )));
    }

    let mut pcm = Vec::with_capacity(reader.len() as usize * 2);
    for sample in reader.into_samples::<i16>() {
        pcm.extend_from_slice(&sample?.to_le_bytes());
    }
    Ok(pcm)
}

/// Wall-clock duration of `frames` frames.
pub fn chunk_duration(frames: usize, format: &AudioFormat) -> Duration {
    if format.sample_rate_hertz == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(frames as u64 * 1_000_000_000 / u64::from(format.sample_rate_hertz))
}

/// Stream a WAV file into the session's open audio segment.
///
/// Chunks of `chunk_frames` frames are enqueued one per chunk duration, the
/// way a capture device delivers them. Returns the number of chunks sent.
pub async fn stream_wav_file(
    session: &StreamSession,
    path: &Path,
    chunk_frames: usize,
    cancel: CancellationToken,
) -> Result<usize, AudioError> {
    let format = session.config().input_audio;
    let pcm = read_pcm16_wav(path, &format)?;
    let chunk_bytes = chunk_frames.max(1) * format.frame_bytes();
    let pace = chunk_duration(chunk_frames.max(1), &format);

    info!(
        "Streaming {} ({} bytes) in {} byte chunks",
        path.display(),
        pcm.len(),
        chunk_bytes
    );

    let mut interval = tokio::time::interval(pace.max(Duration::from_millis(1)));
    let mut sent = 0;
    for chunk in pcm.chunks(chunk_bytes) {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Capture cancelled after {} chunks", sent);
                break;
            }
            _ = interval.tick() => {}
        }
        session.enqueue_audio_chunk(Bytes::copy_from_slice(chunk))?;
        sent += 1;
    }

    Ok(sent)
}

/// Playback sink that records egress audio to a WAV file.
pub struct WavPlaybackSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    pending: Option<u8>,
}

impl WavPlaybackSink {
    pub fn create(path: &Path, format: &AudioFormat) -> Result<Self, AudioError> {
        let spec = hound::WavSpec {
            channels: format.channel_count as u16,
            sample_rate: format.sample_rate_hertz,
            bits_per_sample: format.sample_size_bits as u16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)?;
        Ok(Self {
            writer: Some(writer),
            pending: None,
        })
    }
}

#[async_trait]
impl PlaybackSink for WavPlaybackSink {
    async fn play(&mut self, chunk: Bytes) -> Result<(), PipeError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PipeError::Playback("WAV writer already finalized".to_string()))?;

        let mut bytes = chunk.iter().copied();
        // Chunks may split a sample across a boundary.
        if let Some(low) = self.pending.take() {
            match bytes.next() {
                Some(high) => writer
                    .write_sample(i16::from_le_bytes([low, high]))
                    .map_err(|e| PipeError::Playback(e.to_string()))?,
                None => {
                    self.pending = Some(low);
                    return Ok(());
                }
            }
        }
        loop {
            match (bytes.next(), bytes.next()) {
                (Some(low), Some(high)) => writer
                    .write_sample(i16::from_le_bytes([low, high]))
                    .map_err(|e| PipeError::Playback(e.to_string()))?,
                (Some(low), None) => {
                    self.pending = Some(low);
                    break;
                }
                _ => break,
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), PipeError> {
        if self.pending.take().is_some() {
            warn!("Discarding trailing odd byte of egress audio");
        }
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| PipeError::Playback(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_read_pcm16_wav() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.wav");
        write_wav(&path, 16000, 1, &[1, -2, 300]);

        let pcm = read_pcm16_wav(&path, &AudioFormat::input()).unwrap();
        assert_eq!(pcm, vec![1, 0, 0xFE, 0xFF, 0x2C, 0x01]);
    }

    #[test]
    fn test_read_rejects_wrong_rate_and_channels() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 16000, 2, &[0, 0]);
        assert!(matches!(
            read_pcm16_wav(&path, &AudioFormat::input()),
            Err(AudioError::Format(_))
        ));

        let path = dir.path().join("fast.wav");
        write_wav(&path, 48000, 1, &[0]);
        assert!(matches!(
            read_pcm16_wav(&path, &AudioFormat::input()),
            Err(AudioError::Format(_))
        ));
    }

    #[test]
    fn test_chunk_duration() {
        assert_eq!(
            chunk_duration(1600, &AudioFormat::input()),
            Duration::from_millis(100)
        );
        assert_eq!(
            chunk_duration(1024, &AudioFormat::input()),
            Duration::from_millis(64)
        );
    }

    #[tokio::test]
    async fn test_wav_sink_reassembles_split_samples() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let mut sink = WavPlaybackSink::create(&path, &AudioFormat::output()).unwrap();

        // 0x0102 and -1, split across chunk boundaries
        sink.play(Bytes::from_static(&[0x02])).await.unwrap();
        sink.play(Bytes::from_static(&[0x01, 0xFF])).await.unwrap();
        sink.play(Bytes::from_static(&[0xFF])).await.unwrap();
        sink.finish().await.unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24000);
        let samples: Vec<i16> = reader.into_samples().map(Result::unwrap).collect();
        assert_eq!(samples, vec![0x0102, -1]);
    }

    #[tokio::test]
    async fn test_wav_sink_rejects_play_after_finish() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let mut sink = WavPlaybackSink::create(&path, &AudioFormat::output()).unwrap();
        sink.finish().await.unwrap();
        assert_err!(sink.play(Bytes::from_static(&[0, 0])).await);
        // A second finish is harmless
        assert_ok!(sink.finish().await);
    }
}
