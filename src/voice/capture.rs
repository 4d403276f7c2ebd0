//! Recording the user's utterance to a WAV file

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc as std_mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use thiserror::Error;

use crate::signal::SignalSender;

/// Default recording sample rate
pub const SAMPLE_RATE: u32 = 16000;

/// How often the recorder reports progress
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Largest amplitude a progress report can carry
const PEAK_SCALE: f32 = 32767.0;

/// Capture failures
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Disk is full
    #[error("no storage space left for recording")]
    StorageExhausted,

    /// File system failure
    #[error("recording io error: {0}")]
    Io(#[source] std::io::Error),

    /// Microphone could not be opened or failed mid-stream
    #[error("audio device error: {0}")]
    Device(String),

    /// WAV encoding failed
    #[error("encoding error: {0}")]
    Encode(String),

    /// A recording is already in progress
    #[error("already recording")]
    AlreadyRecording,

    /// No recording in progress
    #[error("not recording")]
    NotRecording,
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            Self::StorageExhausted
        } else {
            Self::Io(err)
        }
    }
}

impl From<hound::Error> for CaptureError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => e.into(),
            other => Self::Encode(other.to_string()),
        }
    }
}

/// Requested recording format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    /// Channel count
    pub channels: u16,
    /// Samples per second
    pub sample_rate: u32,
    /// Target bitrate for compressed encoders
    pub bitrate: u32,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bitrate: 128_000,
        }
    }
}

/// Progress and terminal events of a recording
#[derive(Debug)]
pub enum RecorderEvent {
    /// Capture began
    Started { path: PathBuf },
    /// Periodic report with the peak amplitude since the last one
    Progress { elapsed_ms: u64, amplitude: u16 },
    /// Capture paused
    Paused,
    /// Capture resumed
    Resumed,
    /// File finalized
    Finished {
        path: PathBuf,
        duration_ms: u64,
        size_bytes: u64,
    },
    /// Capture failed; the file is unusable
    Failed(CaptureError),
}

/// Writes the microphone to a file
///
/// Implementations report through [`RecorderEvent`]s posted on the signal
/// queue: `Started` once capture runs, `Progress` about every 100ms, and
/// exactly one of `Finished` or `Failed` after [`Recorder::stop`].
pub trait Recorder: Send + Sync {
    /// Start recording to `path`
    ///
    /// # Errors
    ///
    /// Returns error if the device or the file cannot be opened
    fn start(&self, path: &Path, format: CaptureFormat) -> Result<(), CaptureError>;

    /// Stop recording and finalize the file
    ///
    /// # Errors
    ///
    /// Returns error if nothing is being recorded
    fn stop(&self) -> Result<(), CaptureError>;

    /// Pause capture without closing the file
    ///
    /// # Errors
    ///
    /// Returns error if nothing is being recorded
    fn pause(&self) -> Result<(), CaptureError>;

    /// Resume a paused capture
    ///
    /// # Errors
    ///
    /// Returns error if nothing is being recorded
    fn resume(&self) -> Result<(), CaptureError>;

    /// Whether a recording holds the microphone
    fn is_recording(&self) -> bool;
}

struct Session {
    stop_tx: std_mpsc::Sender<()>,
    paused: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// cpal + hound recorder writing 16-bit PCM WAV
pub struct WavRecorder {
    signals: SignalSender,
    session: Mutex<Option<Session>>,
}

impl WavRecorder {
    /// Create a recorder that reports on `signals`
    #[must_use]
    pub const fn new(signals: SignalSender) -> Self {
        Self {
            signals,
            session: Mutex::new(None),
        }
    }

    fn session(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_paused(&self, paused: bool) -> Result<(), CaptureError> {
        let guard = self.session();
        let session = guard.as_ref().ok_or(CaptureError::NotRecording)?;
        if session.paused.swap(paused, Ordering::SeqCst) != paused {
            let event = if paused {
                RecorderEvent::Paused
            } else {
                RecorderEvent::Resumed
            };
            self.signals.recorder(event);
        }
        Ok(())
    }
}

impl Recorder for WavRecorder {
    fn start(&self, path: &Path, format: CaptureFormat) -> Result<(), CaptureError> {
        let mut guard = self.session();
        if guard.as_ref().is_some_and(|s| !s.thread.is_finished()) {
            return Err(CaptureError::AlreadyRecording);
        }

        let (stop_tx, stop_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let paused = Arc::new(AtomicBool::new(false));

        let thread = {
            let path = path.to_path_buf();
            let paused = Arc::clone(&paused);
            let signals = self.signals.clone();
            std::thread::Builder::new()
                .name("voicegate-recorder".to_string())
                .spawn(move || {
                    record(&path, format, &paused, &stop_rx, &ready_tx, &signals);
                })
                .map_err(CaptureError::Io)?
        };

        match super::blocking(|| ready_rx.recv()) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = super::blocking(|| thread.join());
                return Err(e);
            }
            Err(_) => {
                let _ = super::blocking(|| thread.join());
                return Err(CaptureError::Device("recorder thread exited".to_string()));
            }
        }

        tracing::info!(
            path = %path.display(),
            channels = format.channels,
            sample_rate = format.sample_rate,
            "recording started"
        );

        *guard = Some(Session {
            stop_tx,
            paused,
            thread,
        });
        Ok(())
    }

    fn stop(&self) -> Result<(), CaptureError> {
        let session = self.session().take().ok_or(CaptureError::NotRecording)?;
        // a closed channel means the thread already ended on its own
        let _ = session.stop_tx.send(());
        tracing::debug!("recording stop requested");
        Ok(())
    }

    fn pause(&self) -> Result<(), CaptureError> {
        self.set_paused(true)
    }

    fn resume(&self) -> Result<(), CaptureError> {
        self.set_paused(false)
    }

    fn is_recording(&self) -> bool {
        self.session()
            .as_ref()
            .is_some_and(|s| !s.thread.is_finished())
    }
}

type WavFile = hound::WavWriter<BufWriter<File>>;

/// Body of the recorder thread; the cpal stream never leaves it
fn record(
    path: &Path,
    format: CaptureFormat,
    paused: &AtomicBool,
    stop_rx: &std_mpsc::Receiver<()>,
    ready: &std_mpsc::Sender<Result<(), CaptureError>>,
    signals: &SignalSender,
) {
    let buffer = Arc::new(Mutex::new(Vec::<f32>::new()));

    let opened = open_input_stream(format, Arc::clone(&buffer)).and_then(|stream| {
        let writer = create_writer(path, format)?;
        Ok((stream, writer))
    });
    let (stream, mut writer) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    signals.recorder(RecorderEvent::Started {
        path: path.to_path_buf(),
    });

    let mut elapsed_ms = 0u64;
    let result = loop {
        let stopping = !matches!(
            stop_rx.recv_timeout(PROGRESS_INTERVAL),
            Err(std_mpsc::RecvTimeoutError::Timeout)
        );

        let samples = buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();

        // samples captured while paused are dropped
        let is_paused = paused.load(Ordering::SeqCst);
        if !is_paused {
            if let Err(e) = write_samples(&mut writer, &samples) {
                break Err(e);
            }
            #[allow(clippy::cast_possible_truncation)]
            let step = PROGRESS_INTERVAL.as_millis() as u64;
            elapsed_ms += step;
        }

        if stopping {
            break Ok(());
        }
        if is_paused {
            continue;
        }

        signals.recorder(RecorderEvent::Progress {
            elapsed_ms,
            amplitude: peak_amplitude(&samples),
        });
    };

    drop(stream);

    let event = match result.and_then(|()| finalize(path, writer, format)) {
        Ok((duration_ms, size_bytes)) => {
            tracing::info!(path = %path.display(), duration_ms, size_bytes, "recording finished");
            RecorderEvent::Finished {
                path: path.to_path_buf(),
                duration_ms,
                size_bytes,
            }
        }
        Err(e) => {
            tracing::error!(error = %e, path = %path.display(), "recording failed");
            RecorderEvent::Failed(e)
        }
    };
    signals.recorder(event);
}

fn open_input_stream(
    format: CaptureFormat,
    buffer: Arc<Mutex<Vec<f32>>>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::Device("no input device available".to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| CaptureError::Device(e.to_string()))?
        .find(|c| {
            c.channels() == format.channels
                && c.min_sample_rate() <= SampleRate(format.sample_rate)
                && c.max_sample_rate() >= SampleRate(format.sample_rate)
        })
        .ok_or_else(|| CaptureError::Device("no suitable audio config found".to_string()))?;
    let config: StreamConfig = supported
        .with_sample_rate(SampleRate(format.sample_rate))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = format.sample_rate,
        channels = config.channels,
        "recorder input opened"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| {
                tracing::error!(error = %err, "recorder capture error");
            },
            None,
        )
        .map_err(|e| CaptureError::Device(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::Device(e.to_string()))?;
    Ok(stream)
}

const fn wav_spec(format: CaptureFormat) -> hound::WavSpec {
    hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn create_writer(path: &Path, format: CaptureFormat) -> Result<WavFile, CaptureError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(hound::WavWriter::create(path, wav_spec(format))?)
}

fn write_samples<W>(writer: &mut hound::WavWriter<W>, samples: &[f32]) -> Result<(), CaptureError>
where
    W: std::io::Write + std::io::Seek,
{
    for &sample in samples {
        writer.write_sample(to_i16(sample))?;
    }
    Ok(())
}

fn finalize(path: &Path, writer: WavFile, format: CaptureFormat) -> Result<(u64, u64), CaptureError> {
    let frames = u64::from(writer.duration());
    writer.finalize()?;
    let size_bytes = std::fs::metadata(path)?.len();
    let duration_ms = frames * 1000 / u64::from(format.sample_rate.max(1));
    Ok((duration_ms, size_bytes))
}

#[allow(clippy::cast_possible_truncation)]
fn to_i16(sample: f32) -> i16 {
    (sample * PEAK_SCALE).clamp(-32768.0, PEAK_SCALE) as i16
}

/// Peak absolute amplitude scaled to `0..=32767`
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn peak_amplitude(samples: &[f32]) -> u16 {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    (peak.min(1.0) * PEAK_SCALE) as u16
}

/// Convert mono f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, CaptureError> {
    let spec = wav_spec(CaptureFormat {
        channels: 1,
        sample_rate,
        bitrate: 0,
    });

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        write_samples(&mut writer, samples)?;
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_is_scaled_and_clamped() {
        assert_eq!(peak_amplitude(&[]), 0);
        assert_eq!(peak_amplitude(&[0.0, -0.0]), 0);
        assert_eq!(peak_amplitude(&[0.1, -1.0, 0.5]), 32767);
        assert_eq!(peak_amplitude(&[2.0]), 32767);
        assert_eq!(peak_amplitude(&[-0.5]), 16383);
    }

    #[test]
    fn wav_bytes_have_header() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5], SAMPLE_RATE).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44 byte header + 3 samples of 2 bytes
        assert_eq!(wav.len(), 50);
    }

    #[test]
    fn disk_full_maps_to_storage_exhausted() {
        let err: CaptureError = std::io::Error::from(std::io::ErrorKind::StorageFull).into();
        assert!(matches!(err, CaptureError::StorageExhausted));

        let err: CaptureError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert!(matches!(err, CaptureError::Io(_)));
    }

    #[test]
    fn stop_without_recording_fails() {
        let (signals, _rx) = crate::signal::channel();
        let recorder = WavRecorder::new(signals);
        assert!(!recorder.is_recording());
        assert!(matches!(recorder.stop(), Err(CaptureError::NotRecording)));
        assert!(matches!(recorder.pause(), Err(CaptureError::NotRecording)));
    }

    #[test]
    fn finalize_reports_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rec.wav");
        let format = CaptureFormat::default();

        let mut writer = create_writer(&path, format).unwrap();
        write_samples(&mut writer, &vec![0.25; 8000]).unwrap();
        let (duration_ms, size_bytes) = finalize(&path, writer, format).unwrap();

        assert_eq!(duration_ms, 500);
        assert_eq!(size_bytes, 44 + 16000);
    }
}
