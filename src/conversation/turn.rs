//! A single conversational cycle

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempPath;

/// Where a turn is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No live turn
    #[default]
    Idle,
    /// Capturing the user's utterance
    Recording,
    /// Waiting on the assistant
    Uploading,
    /// Playing the assistant's reply
    Playing,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Recording => write!(f, "recording"),
            Self::Uploading => write!(f, "uploading"),
            Self::Playing => write!(f, "playing"),
        }
    }
}

/// What asked for a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnTrigger {
    /// Wake word heard
    WakeWord,
    /// Button press pattern fired
    ButtonPattern,
    /// UI command
    User,
    /// The assistant asked to keep talking
    Continuation,
    /// A recording the core did not start
    External,
}

/// Why a recording is being stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Silence gate fired
    Silence,
    /// Button press pattern fired
    ButtonPattern,
    /// UI command
    User,
}

/// State of the live turn, owned by the orchestrator
#[derive(Debug, Default)]
pub struct ConversationTurn {
    id: u64,
    trigger: Option<TurnTrigger>,
    pub(crate) state: TurnState,
    pub(crate) audio_file: Option<PathBuf>,
    pub(crate) should_continue: bool,
    pub(crate) response_audio: Option<TempPath>,
    pub(crate) paused: bool,
}

impl ConversationTurn {
    /// A fresh turn, still `Idle`
    #[must_use]
    pub fn new(id: u64, trigger: TurnTrigger) -> Self {
        Self {
            id,
            trigger: Some(trigger),
            ..Self::default()
        }
    }

    /// Turn number; 0 before the first turn
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// What started this turn
    #[must_use]
    pub const fn trigger(&self) -> Option<TurnTrigger> {
        self.trigger
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    /// The user's recording
    #[must_use]
    pub fn audio_file(&self) -> Option<&Path> {
        self.audio_file.as_deref()
    }

    /// Whether the assistant asked to continue
    #[must_use]
    pub const fn should_continue(&self) -> bool {
        self.should_continue
    }

    /// Whether the recording is paused
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Reply audio awaiting or in playback
    #[must_use]
    pub fn response_audio(&self) -> Option<&Path> {
        self.response_audio.as_deref()
    }

    /// Delete the reply audio and clear the continuation flag
    ///
    /// Safe to call any number of times.
    pub fn cleanup(&mut self) {
        if let Some(audio) = self.response_audio.take() {
            let path = audio.to_path_buf();
            if let Err(e) = audio.close() {
                tracing::warn!(path = %path.display(), error = %e, "failed to delete reply audio");
            }
        }
        self.should_continue = false;
        self.paused = false;
    }
}
