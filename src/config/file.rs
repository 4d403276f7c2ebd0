//! TOML configuration file loading
//!
//! Supports `~/.config/voicegate/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

use crate::detect::WindowBoundary;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoicegateConfigFile {
    /// Silence gate and press pattern tuning
    #[serde(default)]
    pub detection: DetectionFileConfig,

    /// Microphone handover timing
    #[serde(default)]
    pub arbiter: ArbiterFileConfig,

    /// Assistant endpoint
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// Recording output
    #[serde(default)]
    pub recording: RecordingFileConfig,

    /// Wake word listener
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Key names that count as pattern presses
    #[serde(default)]
    pub monitored_keys: Option<Vec<String>>,
}

/// Detector tuning
#[derive(Debug, Default, Deserialize)]
pub struct DetectionFileConfig {
    pub silence_threshold: Option<u16>,
    pub silence_duration_ms: Option<u64>,
    pub press_count: Option<usize>,
    pub press_window_ms: Option<u64>,
    /// "exclusive" or "inclusive"
    pub press_boundary: Option<WindowBoundary>,
}

/// Microphone handover timing
#[derive(Debug, Default, Deserialize)]
pub struct ArbiterFileConfig {
    /// Wait after a release before the next owner may start
    pub settle_delay_ms: Option<u64>,
    /// Wait between stopping the listener and starting the recorder
    pub recorder_guard_ms: Option<u64>,
}

/// Assistant endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    pub url: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub io_timeout_secs: Option<u64>,
    pub transcription_header: Option<String>,
    pub response_text_header: Option<String>,
    pub continue_header: Option<String>,
}

/// Recording output configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecordingFileConfig {
    pub dir: Option<String>,
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
    pub bitrate: Option<u32>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Phrases that wake the assistant (e.g. "hey ari")
    pub keywords: Option<Vec<String>>,
    /// Transcription endpoint used to confirm keywords
    pub stt_url: Option<String>,
    /// STT model (e.g. "whisper-1")
    pub keyword_model: Option<String>,
    pub stt_api_key: Option<String>,
    /// Set false to forbid microphone capture entirely
    pub capture_permitted: Option<bool>,
}

/// Parse a config file body
///
/// # Errors
///
/// Returns error if the content is not valid TOML for this schema
pub fn parse_config(content: &str) -> Result<VoicegateConfigFile, toml::de::Error> {
    toml::from_str(content)
}

/// Load the TOML config file from the standard path
///
/// Returns `VoicegateConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoicegateConfigFile {
    let Some(path) = config_file_path() else {
        return VoicegateConfigFile::default();
    };

    if !path.exists() {
        return VoicegateConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoicegateConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoicegateConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voicegate/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voicegate").join("config.toml"))
}
