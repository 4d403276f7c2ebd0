//! Configuration management for voicegate

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::detect::{
    DEFAULT_PRESS_COUNT, DEFAULT_PRESS_WINDOW_MS, DEFAULT_SILENCE_DURATION_MS,
    DEFAULT_SILENCE_THRESHOLD, PressPatternDetector, SilenceGate, WindowBoundary,
};
use crate::mic::ArbiterConfig;
use crate::voice::{CaptureFormat, DEFAULT_STT_URL};
use crate::{Error, Result};

use self::file::VoicegateConfigFile;

/// Default assistant endpoint
pub const DEFAULT_ASSISTANT_URL: &str = "http://localhost:8000/talk";

/// Default wake phrase
pub const DEFAULT_WAKE_KEYWORD: &str = "hey ari";

/// voicegate configuration
#[derive(Debug)]
pub struct Config {
    /// Detector tuning
    pub detection: DetectionConfig,

    /// Microphone handover timing
    pub arbiter: ArbiterConfig,

    /// Assistant endpoint
    pub assistant: AssistantConfig,

    /// Recording output
    pub recording: RecordingConfig,

    /// Wake word listener
    pub wake: WakeConfig,

    /// Key names that count as pattern presses
    pub monitored_keys: Vec<String>,

    /// Path to data directory (recordings, replies)
    pub data_dir: PathBuf,
}

/// Silence gate and press pattern tuning
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Amplitude below which a sample counts as silent
    pub silence_threshold: u16,

    /// Continuous silence that ends a recording
    pub silence_duration_ms: u64,

    /// Presses needed inside the window
    pub press_count: usize,

    /// Sliding window length
    pub press_window_ms: u64,

    /// Treatment of a press on the window edge
    pub press_boundary: WindowBoundary,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            silence_duration_ms: DEFAULT_SILENCE_DURATION_MS,
            press_count: DEFAULT_PRESS_COUNT,
            press_window_ms: DEFAULT_PRESS_WINDOW_MS,
            press_boundary: WindowBoundary::default(),
        }
    }
}

impl DetectionConfig {
    /// Build a silence gate from these settings
    #[must_use]
    pub const fn silence_gate(&self) -> SilenceGate {
        SilenceGate::new(self.silence_threshold, self.silence_duration_ms)
    }

    /// Build a press detector from these settings
    #[must_use]
    pub fn press_detector(&self) -> PressPatternDetector {
        PressPatternDetector::with_boundary(self.press_count, self.press_window_ms, self.press_boundary)
    }
}

/// Assistant endpoint configuration
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Multipart upload URL (from `VOICEGATE_ASSISTANT_URL`)
    pub url: String,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Whole-request timeout covering upload and reply
    pub io_timeout: Duration,

    /// Header carrying the user's transcribed words
    pub transcription_header: String,

    /// Header carrying the assistant's reply text
    pub response_text_header: String,

    /// Header carrying the continue-conversation flag
    pub continue_header: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ASSISTANT_URL.to_string(),
            connect_timeout: Duration::from_secs(60),
            io_timeout: Duration::from_secs(120),
            transcription_header: "X-Transcription".to_string(),
            response_text_header: "X-Response-Text".to_string(),
            continue_header: "X-Continue-Conversation".to_string(),
        }
    }
}

/// Recording output configuration
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Directory recordings are written to
    pub dir: PathBuf,

    /// Channel count
    pub channels: u16,

    /// Samples per second
    pub sample_rate: u32,

    /// Target bitrate for compressed encoders
    pub bitrate: u32,
}

impl RecordingConfig {
    /// Capture format for the recorder
    #[must_use]
    pub const fn format(&self) -> CaptureFormat {
        CaptureFormat {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bitrate: self.bitrate,
        }
    }
}

/// Wake word listener configuration
#[derive(Debug)]
pub struct WakeConfig {
    /// Phrases that wake the assistant
    pub keywords: Vec<String>,

    /// Transcription endpoint
    pub stt_url: String,

    /// STT model used to confirm keywords
    pub keyword_model: String,

    /// STT API key (from `OPENAI_API_KEY`)
    pub stt_api_key: Option<SecretString>,

    /// Whether microphone capture is allowed at all
    pub capture_permitted: bool,
}

/// Default data directory: `~/.local/share/voicegate` on Linux
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/voicegate"),
        |d| d.data_dir().join("voicegate"),
    )
}

/// Parse an env value, ignoring it when malformed
fn parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a setting is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        let config = Self::resolve(fc, |key| std::env::var(key).ok())?;

        if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
            tracing::warn!(
                path = %config.data_dir.display(),
                error = %e,
                "failed to create data directory"
            );
        }

        Ok(config)
    }

    /// Merge a parsed config file with environment lookups
    ///
    /// # Errors
    ///
    /// Returns error if a setting is invalid
    pub fn resolve<F>(fc: VoicegateConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = env("VOICEGATE_DATA_DIR").map_or_else(default_data_dir, PathBuf::from);

        let defaults = DetectionConfig::default();
        let detection = DetectionConfig {
            silence_threshold: parsed(&env, "VOICEGATE_SILENCE_THRESHOLD")
                .or(fc.detection.silence_threshold)
                .unwrap_or(defaults.silence_threshold),
            silence_duration_ms: parsed(&env, "VOICEGATE_SILENCE_DURATION_MS")
                .or(fc.detection.silence_duration_ms)
                .unwrap_or(defaults.silence_duration_ms),
            press_count: fc.detection.press_count.unwrap_or(defaults.press_count),
            press_window_ms: fc.detection.press_window_ms.unwrap_or(defaults.press_window_ms),
            press_boundary: fc.detection.press_boundary.unwrap_or(defaults.press_boundary),
        };
        if detection.press_count == 0 {
            return Err(Error::Config("detection.press_count must be at least 1".to_string()));
        }

        let arbiter_defaults = ArbiterConfig::default();
        let arbiter = ArbiterConfig {
            settle_delay: fc
                .arbiter
                .settle_delay_ms
                .map_or(arbiter_defaults.settle_delay, Duration::from_millis),
            recorder_guard: fc
                .arbiter
                .recorder_guard_ms
                .map_or(arbiter_defaults.recorder_guard, Duration::from_millis),
        };

        let assistant_defaults = AssistantConfig::default();
        let assistant = AssistantConfig {
            url: env("VOICEGATE_ASSISTANT_URL")
                .or(fc.assistant.url)
                .unwrap_or(assistant_defaults.url),
            connect_timeout: fc
                .assistant
                .connect_timeout_secs
                .map_or(assistant_defaults.connect_timeout, Duration::from_secs),
            io_timeout: fc
                .assistant
                .io_timeout_secs
                .map_or(assistant_defaults.io_timeout, Duration::from_secs),
            transcription_header: fc
                .assistant
                .transcription_header
                .unwrap_or(assistant_defaults.transcription_header),
            response_text_header: fc
                .assistant
                .response_text_header
                .unwrap_or(assistant_defaults.response_text_header),
            continue_header: fc
                .assistant
                .continue_header
                .unwrap_or(assistant_defaults.continue_header),
        };
        url::Url::parse(&assistant.url)
            .map_err(|e| Error::Config(format!("invalid assistant url {}: {e}", assistant.url)))?;

        let default_format = CaptureFormat::default();
        let recording = RecordingConfig {
            dir: env("VOICEGATE_RECORDING_DIR")
                .or(fc.recording.dir)
                .map_or_else(|| data_dir.join("recordings"), PathBuf::from),
            channels: fc.recording.channels.unwrap_or(default_format.channels),
            sample_rate: fc.recording.sample_rate.unwrap_or(default_format.sample_rate),
            bitrate: fc.recording.bitrate.unwrap_or(default_format.bitrate),
        };
        if recording.channels == 0 || recording.sample_rate == 0 {
            return Err(Error::Config(
                "recording.channels and recording.sample_rate must be non-zero".to_string(),
            ));
        }

        let keywords = env("VOICEGATE_WAKE_KEYWORDS")
            .map(|v| v.split(',').map(|k| k.trim().to_string()).collect())
            .or(fc.wake.keywords)
            .unwrap_or_else(|| vec![DEFAULT_WAKE_KEYWORD.to_string()]);
        let wake = WakeConfig {
            keywords,
            stt_url: env("VOICEGATE_STT_URL")
                .or(fc.wake.stt_url)
                .unwrap_or_else(|| DEFAULT_STT_URL.to_string()),
            keyword_model: env("VOICEGATE_STT_MODEL")
                .or(fc.wake.keyword_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            stt_api_key: env("OPENAI_API_KEY")
                .or(fc.wake.stt_api_key)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            capture_permitted: fc.wake.capture_permitted.unwrap_or(true),
        };

        let monitored_keys = fc
            .monitored_keys
            .unwrap_or_else(|| vec!["volume_up".to_string(), "volume_down".to_string()])
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .collect();

        Ok(Self {
            detection,
            arbiter,
            assistant,
            recording,
            wake,
            monitored_keys,
            data_dir,
        })
    }

    /// Whether `key` is one of the monitored hardware keys
    #[must_use]
    pub fn is_monitored_key(&self, key: &str) -> bool {
        let key = key.trim().to_lowercase();
        self.monitored_keys.iter().any(|k| *k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::resolve(VoicegateConfigFile::default(), no_env).unwrap();

        assert_eq!(config.detection.silence_threshold, 500);
        assert_eq!(config.detection.silence_duration_ms, 2500);
        assert_eq!(config.detection.press_count, 4);
        assert_eq!(config.detection.press_window_ms, 2000);
        assert_eq!(config.detection.press_boundary, WindowBoundary::Exclusive);
        assert_eq!(config.arbiter.settle_delay, Duration::from_millis(100));
        assert_eq!(config.arbiter.recorder_guard, Duration::from_millis(200));
        assert_eq!(config.assistant.url, DEFAULT_ASSISTANT_URL);
        assert_eq!(config.assistant.connect_timeout, Duration::from_secs(60));
        assert_eq!(config.assistant.io_timeout, Duration::from_secs(120));
        assert_eq!(config.recording.format(), CaptureFormat::default());
        assert_eq!(config.wake.keywords, vec!["hey ari"]);
        assert!(config.wake.stt_api_key.is_none());
        assert!(config.wake.capture_permitted);
        assert!(config.is_monitored_key("VOLUME_UP"));
        assert!(!config.is_monitored_key("power"));
    }

    #[test]
    fn env_overrides_file() {
        let fc = file::parse_config(
            r#"
[assistant]
url = "http://file.example/talk"

[detection]
silence_threshold = 900
"#,
        )
        .unwrap();

        let config = Config::resolve(fc, |key| match key {
            "VOICEGATE_ASSISTANT_URL" => Some("http://env.example/talk".to_string()),
            "OPENAI_API_KEY" => Some("sk-env".to_string()),
            "VOICEGATE_WAKE_KEYWORDS" => Some("computer, jarvis".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.assistant.url, "http://env.example/talk");
        assert_eq!(config.detection.silence_threshold, 900);
        assert_eq!(config.wake.keywords, vec!["computer", "jarvis"]);
        assert_eq!(
            config.wake.stt_api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("sk-env".to_string())
        );
    }

    #[test]
    fn silence_settings_from_env() {
        let fc = file::parse_config("[detection]\nsilence_duration_ms = 4000").unwrap();

        let config = Config::resolve(fc, |key| match key {
            "VOICEGATE_SILENCE_THRESHOLD" => Some("700".to_string()),
            "VOICEGATE_SILENCE_DURATION_MS" => Some("1800".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.detection.silence_threshold, 700);
        assert_eq!(config.detection.silence_duration_ms, 1800);

        // malformed values fall back to the file, then the default
        let fc = file::parse_config("[detection]\nsilence_duration_ms = 4000").unwrap();
        let config = Config::resolve(fc, |key| {
            key.starts_with("VOICEGATE_SILENCE_").then(|| "soon".to_string())
        })
        .unwrap();
        assert_eq!(config.detection.silence_threshold, 500);
        assert_eq!(config.detection.silence_duration_ms, 4000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let fc = file::parse_config("[detection]\npress_count = 0").unwrap();
        assert!(matches!(Config::resolve(fc, no_env), Err(Error::Config(_))));

        let fc = file::parse_config("[assistant]\nurl = \"not a url\"").unwrap();
        assert!(matches!(Config::resolve(fc, no_env), Err(Error::Config(_))));
    }

    #[test]
    fn recording_dir_defaults_under_data_dir() {
        let config = Config::resolve(VoicegateConfigFile::default(), |key| {
            (key == "VOICEGATE_DATA_DIR").then(|| "/tmp/voicegate-test".to_string())
        })
        .unwrap();
        assert_eq!(config.recording.dir, PathBuf::from("/tmp/voicegate-test/recordings"));
    }
}
