//! Error types for voicegate

use thiserror::Error;

use crate::mic::ArbiterError;
use crate::voice::{CaptureError, EngineError, PlaybackError, UploadError};

/// Result type alias for voicegate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voicegate service
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Voice interaction error
    #[error(transparent)]
    Voice(#[from] VoiceError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure categories of a conversation turn or of the microphone
///
/// Everything except [`VoiceError::EngineInitializationFailed`] is recovered
/// locally by returning to `Idle` with the wake word listener running.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Capture permission is missing
    #[error("microphone permission denied")]
    PermissionDenied,

    /// Wake word engine could not be initialized
    #[error("wake word engine failed to initialize: {0}")]
    EngineInitializationFailed(#[source] EngineError),

    /// Requested microphone owner conflicts with the current owner
    #[error("microphone is busy")]
    MicrophoneBusy,

    /// Network or server failure while talking to the assistant
    #[error("upload failed: {0}")]
    UploadFailed(#[source] UploadError),

    /// The assistant reply could not be played
    #[error("playback failed: {0}")]
    PlaybackFailed(#[source] PlaybackError),

    /// No space left for the recording
    #[error("storage exhausted")]
    StorageExhausted,

    /// Any other capture failure
    #[error("capture failed: {0}")]
    Capture(#[source] CaptureError),

    /// Recorder finished without producing audio
    #[error("recording is empty")]
    EmptyRecording,
}

impl VoiceError {
    /// Short notice suitable for a toast or notification
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied => "Microphone permission required".to_string(),
            Self::EngineInitializationFailed(_) => "Wake word unavailable".to_string(),
            Self::MicrophoneBusy => "Microphone busy".to_string(),
            Self::UploadFailed(e) => e.user_message(),
            Self::PlaybackFailed(_) => "Playback error".to_string(),
            Self::StorageExhausted => "No space left for recording".to_string(),
            Self::Capture(_) => "Failed to start recording".to_string(),
            Self::EmptyRecording => "Nothing was recorded".to_string(),
        }
    }

    /// Whether the owning service has to decide between retry and shutdown
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::EngineInitializationFailed(_))
    }
}

impl From<ArbiterError> for VoiceError {
    fn from(err: ArbiterError) -> Self {
        match err {
            ArbiterError::Busy => Self::MicrophoneBusy,
            ArbiterError::InitializationFailed(e) => Self::EngineInitializationFailed(e),
            ArbiterError::Capture(e) => e.into(),
        }
    }
}

impl From<CaptureError> for VoiceError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::StorageExhausted => Self::StorageExhausted,
            other => Self::Capture(other),
        }
    }
}
