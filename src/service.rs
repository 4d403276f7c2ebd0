//! The voice service
//!
//! Owns the orchestrator and the two detectors, drains the signal queue one
//! signal at a time and tears everything down in order on shutdown.

use tokio::time::Instant;

use crate::Result;
use crate::conversation::{ConversationOrchestrator, StopReason, TurnTrigger};
use crate::detect::{PressPatternDetector, SilenceGate};
use crate::error::VoiceError;
use crate::events::{EventBus, VoiceEvent};
use crate::signal::{Signal, SignalReceiver};
use crate::voice::RecorderEvent;

/// Something kept alive while the service runs (a wake lock, a battery hold)
///
/// Acquired first on start and released last on shutdown.
pub trait ActivityHold: Send {
    /// Take the hold
    fn acquire(&mut self) {}

    /// Let go of the hold
    fn release(&mut self) {}
}

/// For platforms without a hold
#[derive(Debug, Default)]
pub struct NoHold;

impl ActivityHold for NoHold {}

/// Single-writer owner of every voice state machine
pub struct VoiceService {
    orchestrator: ConversationOrchestrator,
    silence: SilenceGate,
    pattern: PressPatternDetector,
    events: EventBus,
    inbox: SignalReceiver,
    hold: Box<dyn ActivityHold>,
    epoch: Instant,
}

impl VoiceService {
    /// Create a service draining `inbox`
    #[must_use]
    pub fn new(
        orchestrator: ConversationOrchestrator,
        silence: SilenceGate,
        pattern: PressPatternDetector,
        events: EventBus,
        inbox: SignalReceiver,
    ) -> Self {
        Self {
            orchestrator,
            silence,
            pattern,
            events,
            inbox,
            hold: Box::new(NoHold),
            epoch: Instant::now(),
        }
    }

    /// Use `hold` instead of the no-op hold
    #[must_use]
    pub fn with_hold(mut self, hold: Box<dyn ActivityHold>) -> Self {
        self.hold = hold;
        self
    }

    /// Run until a shutdown signal or a fatal error
    ///
    /// # Errors
    ///
    /// Returns error if the wake word engine cannot be started
    pub async fn run(mut self) -> Result<()> {
        self.hold.acquire();

        let result = self.run_loop().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "voice service stopping on fatal error");
        }

        self.orchestrator.shutdown().await;
        self.silence.disable();
        self.pattern.reset();
        self.hold.release();

        tracing::info!("voice service stopped");
        result
    }

    async fn run_loop(&mut self) -> Result<()> {
        self.orchestrator.start_listening()?;
        tracing::info!("voice service running");

        while let Some(signal) = self.inbox.recv().await {
            if matches!(signal, Signal::Shutdown) {
                tracing::info!("shutdown requested");
                break;
            }
            self.dispatch(signal).await?;
        }

        Ok(())
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    async fn dispatch(&mut self, signal: Signal) -> std::result::Result<(), VoiceError> {
        tracing::trace!(?signal, "dispatching signal");

        match signal {
            Signal::WakeWordDetected => self.orchestrator.begin_turn(TurnTrigger::WakeWord).await,
            Signal::ButtonPressed => {
                let now = self.now_ms();
                if !self.pattern.add_press(now) {
                    return Ok(());
                }
                tracing::info!("button pattern detected");
                self.events.emit(VoiceEvent::PatternDetected);
                self.orchestrator
                    .toggle_recording(TurnTrigger::ButtonPattern)
                    .await
            }
            Signal::StartTurn => self.orchestrator.begin_turn(TurnTrigger::User).await,
            Signal::StopRecording => {
                self.orchestrator.stop_recording(StopReason::User).await;
                Ok(())
            }
            Signal::ToggleRecording => self.orchestrator.toggle_recording(TurnTrigger::User).await,
            Signal::TogglePause => {
                if self.orchestrator.toggle_pause().is_some() {
                    self.silence.reset();
                }
                Ok(())
            }
            Signal::CancelTurn => self.orchestrator.cancel_turn().await,
            Signal::Recorder(event) => self.on_recorder_event(event).await,
            Signal::UploadFinished { turn, result } => {
                self.orchestrator.on_upload_finished(turn, result).await
            }
            Signal::PlaybackFinished { turn, result } => {
                self.orchestrator.on_playback_finished(turn, result).await
            }
            Signal::Shutdown => Ok(()),
        }
    }

    async fn on_recorder_event(&mut self, event: RecorderEvent) -> std::result::Result<(), VoiceError> {
        match &event {
            RecorderEvent::Started { .. } => self.silence.enable(),
            RecorderEvent::Progress { amplitude, .. } => {
                let now = self.now_ms();
                if self.silence.check(*amplitude, now) {
                    tracing::info!("silence detected, stopping recording");
                    self.events.emit(VoiceEvent::SilenceDetected);
                    self.orchestrator.stop_recording(StopReason::Silence).await;
                }
                return Ok(());
            }
            RecorderEvent::Paused | RecorderEvent::Resumed => self.silence.reset(),
            RecorderEvent::Finished { .. } | RecorderEvent::Failed(_) => self.silence.disable(),
        }

        self.orchestrator.on_recorder_event(event).await
    }
}
