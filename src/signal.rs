//! The serialized state-transition queue
//!
//! Every asynchronous source (wake word callback, recorder thread, network
//! and playback tasks, key presses, UI commands) posts a [`Signal`] here.
//! The service drains the queue one signal at a time, so the microphone
//! arbiter and the conversation orchestrator never see two transitions at
//! once.

use tokio::sync::mpsc;

use crate::voice::{AssistantReply, PlaybackError, RecorderEvent, UploadError};

/// Something the service has to react to
#[derive(Debug)]
pub enum Signal {
    /// Wake word engine heard its keyword
    WakeWordDetected,
    /// A monitored hardware key went down
    ButtonPressed,
    /// UI asked for a new turn
    StartTurn,
    /// UI asked to stop the current recording
    StopRecording,
    /// UI toggle: stop when recording, start when idle
    ToggleRecording,
    /// UI asked to pause or resume the recorder
    TogglePause,
    /// UI asked to abandon the current turn
    CancelTurn,
    /// Recorder progress or terminal event
    Recorder(RecorderEvent),
    /// Assistant round trip finished
    UploadFinished {
        turn: u64,
        result: Result<AssistantReply, UploadError>,
    },
    /// Reply playback finished
    PlaybackFinished {
        turn: u64,
        result: Result<(), PlaybackError>,
    },
    /// Stop the service
    Shutdown,
}

/// Receiving half, owned by the service
pub type SignalReceiver = mpsc::UnboundedReceiver<Signal>;

/// Cloneable posting handle
///
/// Unbounded so that audio threads and callbacks can post without awaiting.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<Signal>,
}

/// Create a new queue
#[must_use]
pub fn channel() -> (SignalSender, SignalReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SignalSender { tx }, rx)
}

impl SignalSender {
    /// Post a signal
    ///
    /// Returns false once the service has stopped.
    pub fn send(&self, signal: Signal) -> bool {
        match self.tx.send(signal) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(signal = ?e.0, "service stopped, dropping signal");
                false
            }
        }
    }

    /// Post a recorder event
    pub fn recorder(&self, event: RecorderEvent) -> bool {
        self.send(Signal::Recorder(event))
    }

    /// Report a wake word detection
    pub fn wake_word_detected(&self) -> bool {
        self.send(Signal::WakeWordDetected)
    }

    /// Report a monitored key press
    pub fn button_pressed(&self) -> bool {
        self.send(Signal::ButtonPressed)
    }

    /// Ask for a new turn
    pub fn start_turn(&self) -> bool {
        self.send(Signal::StartTurn)
    }

    /// Ask to stop recording
    pub fn stop_recording(&self) -> bool {
        self.send(Signal::StopRecording)
    }

    /// Toggle recording
    pub fn toggle_recording(&self) -> bool {
        self.send(Signal::ToggleRecording)
    }

    /// Pause or resume the recorder
    pub fn toggle_pause(&self) -> bool {
        self.send(Signal::TogglePause)
    }

    /// Abandon the current turn
    pub fn cancel_turn(&self) -> bool {
        self.send(Signal::CancelTurn)
    }

    /// Stop the service
    pub fn shutdown(&self) -> bool {
        self.send(Signal::Shutdown)
    }

    /// Whether the service is still draining the queue
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}
