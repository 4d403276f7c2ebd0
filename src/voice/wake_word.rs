//! Wake word listening
//!
//! [`WakeWordEngine`] is the seam the microphone arbiter drives. The bundled
//! [`KeywordWakeEngine`] gates the microphone by energy, cuts speech into
//! segments and confirms a keyword by transcribing each segment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use thiserror::Error;
use tokio::sync::mpsc;

use super::capture::samples_to_wav;
use super::stt::SpeechToText;

/// Sample rate the listener captures at (16kHz for speech)
pub const LISTEN_SAMPLE_RATE: u32 = 16000;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to keep a segment (0.3 seconds)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Silence that ends a segment (0.5 seconds)
const SILENCE_SAMPLES: usize = 8000;

/// How often the capture thread drains its buffer
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wake word engine failures
#[derive(Debug, Error)]
pub enum EngineError {
    /// No microphone to listen on
    #[error("no input device available")]
    NoInputDevice,

    /// Engine could not be set up
    #[error("initialization failed: {0}")]
    Init(String),

    /// Audio stream failed
    #[error("audio stream error: {0}")]
    Stream(String),

    /// Keyword confirmation failed
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Stop was called on an engine that holds no stream
    #[error("engine is not running")]
    NotRunning,
}

/// Callback invoked on every keyword detection
pub type DetectionCallback = Arc<dyn Fn() + Send + Sync>;

/// A continuously listening keyword detector that owns the microphone while started
pub trait WakeWordEngine: Send {
    /// Open the microphone and begin listening
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot be initialized
    fn start(&mut self) -> Result<(), EngineError>;

    /// Stop listening and release the microphone
    ///
    /// # Errors
    ///
    /// Returns error if the underlying handle is invalid
    fn stop(&mut self) -> Result<(), EngineError>;

    /// Whether the engine currently holds the microphone
    fn is_running(&self) -> bool;
}

/// State of the speech segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Speech detected, accumulating
    Listening,
}

/// Cuts a sample stream into speech segments by energy
#[derive(Debug)]
pub struct SpeechSegmenter {
    state: SegmenterState,
    speech_buffer: Vec<f32>,
    voiced: usize,
    silence_counter: usize,
}

impl Default for SpeechSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSegmenter {
    /// Create an idle segmenter
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SegmenterState::Idle,
            speech_buffer: Vec::new(),
            voiced: 0,
            silence_counter: 0,
        }
    }

    /// Feed samples; returns a finished segment when speech is followed by silence
    pub fn process(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Listening;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.voiced = samples.len();
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected, listening");
                }
                None
            }
            SegmenterState::Listening => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.voiced += samples.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                // trailing silence is buffered but does not count as speech
                if self.silence_counter > SILENCE_SAMPLES && self.voiced > MIN_SPEECH_SAMPLES {
                    tracing::debug!(samples = self.speech_buffer.len(), "speech segment complete");
                    let segment = std::mem::take(&mut self.speech_buffer);
                    self.reset();
                    return Some(segment);
                }

                // too much silence without enough speech
                if self.silence_counter > SILENCE_SAMPLES * 2 {
                    tracing::trace!("segment timeout, resetting");
                    self.reset();
                }
                None
            }
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    /// Samples accumulated for the open segment
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.speech_buffer.len()
    }

    /// Drop any open segment
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.speech_buffer.clear();
        self.voiced = 0;
        self.silence_counter = 0;
    }
}

/// Lowercase and trim keywords for matching
#[must_use]
pub fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Find the first normalized keyword contained in a transcript
#[must_use]
pub fn match_keyword<'a>(transcript: &str, keywords: &'a [String]) -> Option<&'a str> {
    let normalized = transcript.to_lowercase();
    keywords
        .iter()
        .find(|k| normalized.contains(k.as_str()))
        .map(String::as_str)
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Threads and tasks of a running engine
struct Running {
    stop: Arc<AtomicBool>,
    capture: JoinHandle<()>,
    confirmer: tokio::task::JoinHandle<()>,
}

/// Energy-gated, transcription-confirmed keyword listener
pub struct KeywordWakeEngine {
    keywords: Arc<Vec<String>>,
    stt: Arc<SpeechToText>,
    on_detect: DetectionCallback,
    running: Option<Running>,
}

impl KeywordWakeEngine {
    /// Create an engine
    ///
    /// `keywords` are matched case-insensitively; `on_detect` runs on a
    /// runtime task each time one is heard.
    ///
    /// # Errors
    ///
    /// Returns error if no usable keyword is given
    pub fn new(
        keywords: &[String],
        stt: SpeechToText,
        on_detect: DetectionCallback,
    ) -> Result<Self, EngineError> {
        let keywords = normalize_keywords(keywords);
        if keywords.is_empty() {
            return Err(EngineError::Init("at least one wake word is required".to_string()));
        }

        tracing::debug!(keywords = ?keywords, "wake word engine created");

        Ok(Self {
            keywords: Arc::new(keywords),
            stt: Arc::new(stt),
            on_detect,
            running: None,
        })
    }

    /// Normalized keywords
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl WakeWordEngine for KeywordWakeEngine {
    fn start(&mut self) -> Result<(), EngineError> {
        if self.running.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Init(e.to_string()))?;

        let (segment_tx, segment_rx) = mpsc::unbounded_channel::<Vec<f32>>();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let capture = {
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("voicegate-wake".to_string())
                .spawn(move || capture_loop(&stop, &ready_tx, &segment_tx))
                .map_err(|e| EngineError::Init(e.to_string()))?
        };

        match super::blocking(|| ready_rx.recv()) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = super::blocking(|| capture.join());
                return Err(e);
            }
            Err(_) => {
                let _ = super::blocking(|| capture.join());
                return Err(EngineError::Init("capture thread exited".to_string()));
            }
        }

        let confirmer = runtime.spawn(confirm_segments(
            segment_rx,
            Arc::clone(&self.stt),
            Arc::clone(&self.keywords),
            Arc::clone(&self.on_detect),
        ));

        self.running = Some(Running {
            stop,
            capture,
            confirmer,
        });
        tracing::info!(keywords = ?self.keywords, "listening for wake word");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        let running = self.running.take().ok_or(EngineError::NotRunning)?;

        running.stop.store(true, Ordering::SeqCst);
        running.confirmer.abort();
        // joining guarantees the input stream has been dropped
        let capture = running.capture;
        super::blocking(|| capture.join())
            .map_err(|_| EngineError::Stream("capture thread panicked".to_string()))?;

        tracing::debug!("wake word engine stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for KeywordWakeEngine {
    fn drop(&mut self) {
        if self.running.is_some() {
            let _ = self.stop();
        }
    }
}

/// Body of the capture thread; the cpal stream never leaves it
fn capture_loop(
    stop: &AtomicBool,
    ready: &std_mpsc::Sender<Result<(), EngineError>>,
    segments: &mpsc::UnboundedSender<Vec<f32>>,
) {
    let buffer = Arc::new(Mutex::new(Vec::<f32>::new()));

    let stream = match open_input_stream(Arc::clone(&buffer)) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut segmenter = SpeechSegmenter::new();
    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(POLL_INTERVAL);

        let samples = buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        if samples.is_empty() {
            continue;
        }

        if let Some(segment) = segmenter.process(&samples) {
            if segments.send(segment).is_err() {
                break;
            }
        }
    }

    drop(stream);
}

fn open_input_stream(buffer: Arc<Mutex<Vec<f32>>>) -> Result<cpal::Stream, EngineError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(EngineError::NoInputDevice)?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| EngineError::Init(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(LISTEN_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(LISTEN_SAMPLE_RATE)
        })
        .ok_or_else(|| EngineError::Init("no suitable audio config found".to_string()))?;
    let config: StreamConfig = supported
        .with_sample_rate(SampleRate(LISTEN_SAMPLE_RATE))
        .config();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| {
                tracing::error!(error = %err, "wake word capture error");
            },
            None,
        )
        .map_err(|e| EngineError::Stream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| EngineError::Stream(e.to_string()))?;
    Ok(stream)
}

/// Transcribe each segment and fire the callback on a keyword match
async fn confirm_segments(
    mut segments: mpsc::UnboundedReceiver<Vec<f32>>,
    stt: Arc<SpeechToText>,
    keywords: Arc<Vec<String>>,
    on_detect: DetectionCallback,
) {
    while let Some(segment) = segments.recv().await {
        let wav = match samples_to_wav(&segment, LISTEN_SAMPLE_RATE) {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode wake word candidate");
                continue;
            }
        };

        match stt.transcribe(wav).await {
            Ok(transcript) => {
                if let Some(keyword) = match_keyword(&transcript, &keywords) {
                    tracing::info!(keyword, transcript = %transcript, "wake word detected");
                    on_detect();
                }
            }
            Err(e) => tracing::warn!(error = %e, "wake word confirmation failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(seconds: f32, amplitude: f32) -> Vec<f32> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let n = (LISTEN_SAMPLE_RATE as f32 * seconds) as usize;
        #[allow(clippy::cast_precision_loss)]
        (0..n)
            .map(|i| {
                let t = i as f32 / LISTEN_SAMPLE_RATE as f32;
                amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
            })
            .collect()
    }

    fn silence(seconds: f32) -> Vec<f32> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let n = (LISTEN_SAMPLE_RATE as f32 * seconds) as usize;
        vec![0.0; n]
    }

    #[test]
    fn test_energy_calculation() {
        assert!(calculate_energy(&silence(0.01)) < 0.001);
        assert!(calculate_energy(&[0.5; 100]) > 0.4);
        assert!(calculate_energy(&[]) < f32::EPSILON);
    }

    #[test]
    fn segment_completes_after_trailing_silence() {
        let mut segmenter = SpeechSegmenter::new();
        assert!(segmenter.process(&silence(0.1)).is_none());
        assert_eq!(segmenter.state(), SegmenterState::Idle);

        assert!(segmenter.process(&tone(0.5, 0.3)).is_none());
        assert_eq!(segmenter.state(), SegmenterState::Listening);

        let segment = segmenter.process(&silence(0.6)).expect("segment");
        assert!(segment.len() > MIN_SPEECH_SAMPLES);
        assert_eq!(segmenter.state(), SegmenterState::Idle);
        assert_eq!(segmenter.buffered(), 0);
    }

    #[test]
    fn short_blip_times_out() {
        let mut segmenter = SpeechSegmenter::new();
        segmenter.process(&tone(0.05, 0.3));
        assert!(segmenter.process(&silence(1.2)).is_none());
        assert_eq!(segmenter.state(), SegmenterState::Idle);
    }

    #[test]
    fn gaps_between_words_do_not_count_as_speech() {
        let mut segmenter = SpeechSegmenter::new();
        for _ in 0..3 {
            assert!(segmenter.process(&tone(0.05, 0.3)).is_none());
            assert!(segmenter.process(&silence(0.4)).is_none());
        }
        assert!(segmenter.buffered() > MIN_SPEECH_SAMPLES);
        assert_eq!(segmenter.state(), SegmenterState::Listening);

        assert!(segmenter.process(&tone(0.3, 0.3)).is_none());
        let segment = segmenter.process(&silence(0.6)).expect("segment");
        assert!(segment.len() > MIN_SPEECH_SAMPLES);
    }

    #[test]
    fn keywords_are_normalized() {
        let keywords = normalize_keywords(&["  Hey ARI ".to_string(), String::new(), "HELLO".to_string()]);
        assert_eq!(keywords, vec!["hey ari", "hello"]);
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let keywords = normalize_keywords(&["hey ari".to_string()]);
        assert_eq!(match_keyword("HEY Ari, what's next?", &keywords), Some("hey ari"));
        assert_eq!(match_keyword("hello world", &keywords), None);
    }
}
