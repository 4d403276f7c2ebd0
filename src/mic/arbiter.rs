//! Exclusive microphone ownership
//!
//! The wake word listener and the recorder both need the one microphone.
//! The arbiter hands it to one of them at a time. Every handover goes
//! through [`MicOwner::None`] and waits out a settle delay, because audio
//! backends report release asynchronously relative to `stop` returning.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::events::{EventBus, VoiceEvent};
use crate::voice::{CaptureError, CaptureFormat, EngineError, Recorder, WakeWordEngine};

/// Default wait after a release before the next owner may start
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Default wait between stopping the listener and starting the recorder
pub const DEFAULT_RECORDER_GUARD: Duration = Duration::from_millis(200);

/// Who holds the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MicOwner {
    /// Nobody; the microphone is free
    #[default]
    None,
    /// The wake word engine is listening
    WakeWordListener,
    /// A recording is in progress
    Recorder,
}

impl fmt::Display for MicOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::WakeWordListener => write!(f, "wake_word_listener"),
            Self::Recorder => write!(f, "recorder"),
        }
    }
}

/// Handover timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterConfig {
    /// Wait after any release
    pub settle_delay: Duration,
    /// Extra wait before the recorder acquires the microphone
    pub recorder_guard: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            recorder_guard: DEFAULT_RECORDER_GUARD,
        }
    }
}

/// Outcome of a recorder start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderStart {
    /// The recorder now owns the microphone
    Started,
    /// The recorder already owned it; nothing changed
    AlreadyActive,
    /// A recording appeared during the guard delay; this request was dropped
    Aborted,
}

/// Arbiter failures
#[derive(Debug, Error)]
pub enum ArbiterError {
    /// The other party holds the microphone
    #[error("microphone is held by the recorder")]
    Busy,

    /// Wake word engine failed to start; not retried
    #[error("wake word engine initialization failed: {0}")]
    InitializationFailed(#[source] EngineError),

    /// Recorder failed to start or is not recording
    #[error("recorder error: {0}")]
    Capture(#[source] CaptureError),
}

/// The exclusive-access state machine for the microphone
pub struct MicrophoneArbiter {
    owner: MicOwner,
    engine: Box<dyn WakeWordEngine>,
    recorder: Arc<dyn Recorder>,
    config: ArbiterConfig,
    events: EventBus,
}

impl fmt::Debug for MicrophoneArbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrophoneArbiter")
            .field("owner", &self.owner)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MicrophoneArbiter {
    /// Create an arbiter; nobody owns the microphone yet
    #[must_use]
    pub fn new(
        engine: Box<dyn WakeWordEngine>,
        recorder: Arc<dyn Recorder>,
        config: ArbiterConfig,
        events: EventBus,
    ) -> Self {
        Self {
            owner: MicOwner::None,
            engine,
            recorder,
            config,
            events,
        }
    }

    /// Current owner
    #[must_use]
    pub const fn owner(&self) -> MicOwner {
        self.owner
    }

    /// Timing in use
    #[must_use]
    pub const fn config(&self) -> ArbiterConfig {
        self.config
    }

    /// Whether the recorder reports a recording in progress
    #[must_use]
    pub fn recorder_active(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Hand the microphone to the wake word listener
    ///
    /// No-op if the listener already owns it.
    ///
    /// # Errors
    ///
    /// Returns [`ArbiterError::Busy`] while the recorder owns the microphone
    /// and [`ArbiterError::InitializationFailed`] if the engine cannot start
    pub fn request_listener_start(&mut self) -> Result<(), ArbiterError> {
        match self.owner {
            MicOwner::WakeWordListener => return Ok(()),
            MicOwner::Recorder => return Err(ArbiterError::Busy),
            MicOwner::None => {}
        }

        self.engine.start().map_err(|e| {
            tracing::error!(error = %e, "wake word engine failed to start");
            ArbiterError::InitializationFailed(e)
        })?;

        self.set_owner(MicOwner::WakeWordListener);
        self.events.emit(VoiceEvent::ListeningResumed);
        Ok(())
    }

    /// Take the microphone away from the wake word listener
    ///
    /// Returns true once the listener has been stopped and the settle delay
    /// has passed; false if the listener did not own the microphone.
    pub async fn request_listener_stop(&mut self) -> bool {
        if self.owner != MicOwner::WakeWordListener {
            return false;
        }

        self.stop_engine();
        self.set_owner(MicOwner::None);
        self.events.emit(VoiceEvent::ListeningPaused);

        tokio::time::sleep(self.config.settle_delay).await;
        true
    }

    /// Hand the microphone to the recorder and start recording to `path`
    ///
    /// Stops the listener first when needed, then waits the guard delay
    /// and rechecks before starting.
    ///
    /// # Errors
    ///
    /// Returns [`ArbiterError::Capture`] if the recorder fails to start
    pub async fn request_recorder_start(
        &mut self,
        path: &Path,
        format: CaptureFormat,
    ) -> Result<RecorderStart, ArbiterError> {
        if self.owner == MicOwner::Recorder {
            return Ok(RecorderStart::AlreadyActive);
        }

        self.request_listener_stop().await;
        tokio::time::sleep(self.config.recorder_guard).await;

        if self.owner != MicOwner::None || self.recorder.is_recording() {
            tracing::warn!(owner = %self.owner, "recording re-armed during guard delay, aborting start");
            return Ok(RecorderStart::Aborted);
        }

        self.recorder.start(path, format).map_err(|e| {
            tracing::error!(error = %e, path = %path.display(), "recorder failed to start");
            ArbiterError::Capture(e)
        })?;

        self.set_owner(MicOwner::Recorder);
        Ok(RecorderStart::Started)
    }

    /// Take the microphone away from the recorder
    ///
    /// Mirrors [`Self::request_listener_stop`].
    pub async fn request_recorder_stop(&mut self) -> bool {
        if self.owner != MicOwner::Recorder {
            return false;
        }

        if let Err(e) = self.recorder.stop() {
            tracing::warn!(error = %e, "recorder stop failed, treating microphone as released");
        }
        self.set_owner(MicOwner::None);

        tokio::time::sleep(self.config.settle_delay).await;
        true
    }

    /// Pause the recorder if it owns the microphone
    ///
    /// # Errors
    ///
    /// Returns error if no recording is in progress
    pub fn pause_recorder(&self) -> Result<(), ArbiterError> {
        if self.owner != MicOwner::Recorder {
            return Err(ArbiterError::Capture(CaptureError::NotRecording));
        }
        self.recorder.pause().map_err(ArbiterError::Capture)
    }

    /// Resume a paused recorder
    ///
    /// # Errors
    ///
    /// Returns error if no recording is in progress
    pub fn resume_recorder(&self) -> Result<(), ArbiterError> {
        if self.owner != MicOwner::Recorder {
            return Err(ArbiterError::Capture(CaptureError::NotRecording));
        }
        self.recorder.resume().map_err(ArbiterError::Capture)
    }

    /// A recording began that the arbiter did not start
    ///
    /// Capture is already running by the time this is reported, so the
    /// owner follows it at once. A listener that still held the microphone
    /// is stopped and a [`VoiceEvent::MicContention`] is emitted.
    pub fn on_external_recording_started(&mut self) {
        match self.owner {
            MicOwner::Recorder => {}
            MicOwner::WakeWordListener => {
                tracing::warn!("recording started while the listener held the microphone");
                self.events.emit(VoiceEvent::MicContention {
                    holder: MicOwner::WakeWordListener,
                });
                self.stop_engine();
                self.set_owner(MicOwner::None);
                self.events.emit(VoiceEvent::ListeningPaused);
                self.set_owner(MicOwner::Recorder);
            }
            MicOwner::None => self.set_owner(MicOwner::Recorder),
        }
    }

    /// A recording ended that the arbiter did not stop
    ///
    /// Waits the settle delay like [`Self::request_recorder_stop`]. Returns
    /// false if the recorder did not own the microphone.
    pub async fn on_external_recording_stopped(&mut self) -> bool {
        if self.owner != MicOwner::Recorder {
            return false;
        }

        self.set_owner(MicOwner::None);
        tokio::time::sleep(self.config.settle_delay).await;
        true
    }

    /// Release the microphone from whoever holds it
    pub async fn release_all(&mut self) {
        match self.owner {
            MicOwner::WakeWordListener => {
                self.request_listener_stop().await;
            }
            MicOwner::Recorder => {
                self.request_recorder_stop().await;
            }
            MicOwner::None => {}
        }
    }

    fn stop_engine(&mut self) {
        // an invalid handle means the engine already let go
        if let Err(e) = self.engine.stop() {
            tracing::warn!(error = %e, "wake word engine stop failed, treating microphone as released");
        }
    }

    fn set_owner(&mut self, next: MicOwner) {
        debug_assert!(
            self.owner == MicOwner::None || next == MicOwner::None,
            "direct owner handover {} -> {next}",
            self.owner
        );
        if self.owner == next {
            return;
        }

        tracing::info!(from = %self.owner, to = %next, "microphone owner changed");
        self.owner = next;
        self.events.emit(VoiceEvent::MicOwnerChanged { owner: next });
    }
}
