//! Playing the assistant's reply to the speakers

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use thiserror::Error;

/// Extra time allowed past the nominal length before giving up
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Completion poll interval
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Playback failures
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Audio could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Output device failure
    #[error("output device error: {0}")]
    Device(String),

    /// Reply file could not be read
    #[error("playback io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Plays an audio file to completion
#[async_trait]
pub trait Player: Send + Sync {
    /// Play `path`, resolving once playback finishes or is stopped
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be decoded or played
    async fn play(&self, path: &Path) -> Result<(), PlaybackError>;

    /// Cut the current playback short
    fn stop(&self);
}

/// MP3 player on the default output device
#[derive(Debug, Default)]
pub struct SpeakerPlayer {
    stop: Arc<AtomicBool>,
}

impl SpeakerPlayer {
    /// Create a player
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Player for SpeakerPlayer {
    async fn play(&self, path: &Path) -> Result<(), PlaybackError> {
        let data = tokio::fs::read(path).await?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "playing reply");

        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);

        tokio::task::spawn_blocking(move || {
            let (samples, sample_rate) = decode_mp3(&data)?;
            play_blocking(samples, sample_rate, &stop)
        })
        .await
        .map_err(|e| PlaybackError::Device(e.to_string()))?
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig, PlaybackError> {
    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
    };

    let supported = supports(1)
        .or_else(|| supports(2))
        .ok_or_else(|| PlaybackError::Device("no suitable output config found".to_string()))?;

    Ok(supported.with_sample_rate(SampleRate(sample_rate)).config())
}

/// Play mono samples, blocking until done or stopped
fn play_blocking(samples: Vec<f32>, sample_rate: u32, stop: &AtomicBool) -> Result<(), PlaybackError> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::Device("no output device available".to_string()))?;
    let config = output_config(&device, sample_rate)?;
    let channels = usize::from(config.channels);

    let sample_count = samples.len();
    let samples = Arc::new(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Relaxed);
                            0.0
                        });
                        frame.fill(sample);
                        if pos < samples.len() {
                            pos += 1;
                        }
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| PlaybackError::Device(e.to_string()))?
    };

    stream
        .play()
        .map_err(|e| PlaybackError::Device(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(sample_rate.max(1));
    let timeout = Duration::from_millis(duration_ms) + DRAIN_GRACE;
    let start = Instant::now();

    while !finished.load(Ordering::Relaxed) {
        if stop.load(Ordering::SeqCst) {
            tracing::debug!("playback stopped early");
            break;
        }
        if start.elapsed() > timeout {
            tracing::warn!("playback did not drain in time");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");
    Ok(())
}

/// Decode MP3 bytes to mono f32 samples and their sample rate
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32), PlaybackError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate.get_or_insert(frame.sample_rate);
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(PlaybackError::Decode(e.to_string())),
        }
    }

    let sample_rate = sample_rate.ok_or_else(|| PlaybackError::Decode("no audio frames".to_string()))?;
    let sample_rate = u32::try_from(sample_rate).map_err(|e| PlaybackError::Decode(e.to_string()))?;
    Ok((samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_not_audio() {
        let err = decode_mp3(b"definitely not an mp3").unwrap_err();
        assert!(matches!(err, PlaybackError::Decode(_)));
    }

    #[test]
    fn empty_input_is_not_audio() {
        assert!(decode_mp3(&[]).is_err());
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let player = SpeakerPlayer::new();
        let err = player
            .play(Path::new("/nonexistent/voicegate-reply.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::Io(_)));
    }
}
