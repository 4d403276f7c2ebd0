//! Conversation turn-taking
//!
//! The orchestrator drives one cycle at a time: acquire the microphone,
//! record, release, upload, play the reply, then either record again
//! (the assistant asked to continue) or hand the microphone back to the
//! wake word listener. Upload and playback run in spawned tasks that post
//! their result back onto the signal queue, so no state is held across
//! those waits.

mod turn;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::VoiceError;
use crate::events::{EventBus, VoiceEvent};
use crate::mic::{ArbiterError, MicOwner, MicrophoneArbiter, RecorderStart};
use crate::signal::{Signal, SignalSender};
use crate::voice::{
    AssistantReply, CaptureFormat, CapturePermission, PlaybackError, Player, RecorderEvent,
    RecordingStore, UploadError, Uploader,
};

pub use turn::{ConversationTurn, StopReason, TurnState, TurnTrigger};

/// The network and playback side of a turn
pub struct Collaborators {
    pub uploader: Arc<dyn Uploader>,
    pub player: Arc<dyn Player>,
    pub permission: Box<dyn CapturePermission>,
}

/// The turn-taking controller
pub struct ConversationOrchestrator {
    arbiter: MicrophoneArbiter,
    uploader: Arc<dyn Uploader>,
    player: Arc<dyn Player>,
    permission: Box<dyn CapturePermission>,
    store: RecordingStore,
    format: CaptureFormat,
    signals: SignalSender,
    events: EventBus,
    turn: ConversationTurn,
    next_turn_id: u64,
    in_flight: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ConversationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationOrchestrator")
            .field("arbiter", &self.arbiter)
            .field("turn", &self.turn)
            .finish_non_exhaustive()
    }
}

impl ConversationOrchestrator {
    /// Create an orchestrator with no live turn
    #[must_use]
    pub fn new(
        arbiter: MicrophoneArbiter,
        collaborators: Collaborators,
        store: RecordingStore,
        format: CaptureFormat,
        signals: SignalSender,
        events: EventBus,
    ) -> Self {
        Self {
            arbiter,
            uploader: collaborators.uploader,
            player: collaborators.player,
            permission: collaborators.permission,
            store,
            format,
            signals,
            events,
            turn: ConversationTurn::default(),
            next_turn_id: 1,
            in_flight: None,
        }
    }

    /// State of the live turn
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.turn.state()
    }

    /// The live (or last) turn
    #[must_use]
    pub const fn turn(&self) -> &ConversationTurn {
        &self.turn
    }

    /// Current microphone owner
    #[must_use]
    pub const fn mic_owner(&self) -> MicOwner {
        self.arbiter.owner()
    }

    /// Hand the microphone to the wake word listener
    ///
    /// # Errors
    ///
    /// Returns error if the wake word engine cannot start
    pub fn start_listening(&mut self) -> Result<(), VoiceError> {
        self.resume_listening()
    }

    /// Start a turn unless one is already live
    ///
    /// # Errors
    ///
    /// Returns error only for fatal failures
    pub async fn begin_turn(&mut self, trigger: TurnTrigger) -> Result<(), VoiceError> {
        if self.state() != TurnState::Idle {
            tracing::debug!(
                turn = self.turn.id(),
                state = %self.state(),
                ?trigger,
                "turn already live, ignoring trigger"
            );
            return Ok(());
        }

        tracing::info!(?trigger, "beginning turn");
        self.start_recording(trigger).await
    }

    /// Stop the current recording; the recorder's finish event moves the turn on
    pub async fn stop_recording(&mut self, reason: StopReason) {
        if self.state() != TurnState::Recording {
            tracing::debug!(?reason, state = %self.state(), "not recording, ignoring stop");
            return;
        }

        tracing::info!(turn = self.turn.id(), ?reason, "stopping recording");
        self.arbiter.request_recorder_stop().await;
    }

    /// Stop when recording, start a turn when idle, ignore otherwise
    ///
    /// # Errors
    ///
    /// Returns error only for fatal failures
    pub async fn toggle_recording(&mut self, trigger: TurnTrigger) -> Result<(), VoiceError> {
        match self.state() {
            TurnState::Recording => {
                let reason = if trigger == TurnTrigger::ButtonPattern {
                    StopReason::ButtonPattern
                } else {
                    StopReason::User
                };
                self.stop_recording(reason).await;
                Ok(())
            }
            TurnState::Idle => self.begin_turn(trigger).await,
            state => {
                tracing::debug!(%state, "toggle ignored while turn is busy");
                Ok(())
            }
        }
    }

    /// Pause or resume the recording
    ///
    /// Returns the new paused flag, or `None` if nothing changed.
    pub fn toggle_pause(&mut self) -> Option<bool> {
        if self.state() != TurnState::Recording {
            return None;
        }

        let pausing = !self.turn.paused;
        let result = if pausing {
            self.arbiter.pause_recorder()
        } else {
            self.arbiter.resume_recorder()
        };

        match result {
            Ok(()) => {
                self.turn.paused = pausing;
                tracing::info!(turn = self.turn.id(), paused = pausing, "recording pause toggled");
                Some(pausing)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to toggle recording pause");
                None
            }
        }
    }

    /// Abandon the live turn and resume listening
    ///
    /// # Errors
    ///
    /// Returns error only for fatal failures
    pub async fn cancel_turn(&mut self) -> Result<(), VoiceError> {
        if self.state() == TurnState::Idle {
            return Ok(());
        }

        tracing::info!(turn = self.turn.id(), state = %self.state(), "turn cancelled");
        self.teardown().await;
        self.resume_listening()
    }

    /// React to a recorder event
    ///
    /// # Errors
    ///
    /// Returns error only for fatal failures
    pub async fn on_recorder_event(&mut self, event: RecorderEvent) -> Result<(), VoiceError> {
        match event {
            RecorderEvent::Started { path } => {
                if self.state() == TurnState::Idle && self.arbiter.recorder_active() {
                    tracing::info!(path = %path.display(), "adopting recording started outside the core");
                    self.arbiter.on_external_recording_started();
                    self.turn = ConversationTurn::new(self.allocate_turn_id(), TurnTrigger::External);
                    self.turn.audio_file = Some(path.clone());
                    self.set_state(TurnState::Recording);
                }
                self.events.emit(VoiceEvent::RecordingStarted { path });
                Ok(())
            }
            RecorderEvent::Finished {
                path,
                duration_ms,
                size_bytes,
            } => {
                self.events.emit(VoiceEvent::RecordingStopped { path: path.clone() });
                self.arbiter.on_external_recording_stopped().await;

                if self.state() != TurnState::Recording {
                    tracing::debug!(path = %path.display(), "recording finished outside a turn");
                    return Ok(());
                }
                if duration_ms == 0 || size_bytes == 0 {
                    return self.fail_turn(VoiceError::EmptyRecording).await;
                }

                self.turn.audio_file = Some(path.clone());
                self.set_state(TurnState::Uploading);
                self.spawn_upload(path);
                Ok(())
            }
            RecorderEvent::Failed(e) => {
                self.arbiter.on_external_recording_stopped().await;
                let err = VoiceError::from(e);
                if self.state() == TurnState::Recording {
                    self.fail_turn(err).await
                } else {
                    self.report_error(None, &err);
                    Ok(())
                }
            }
            RecorderEvent::Progress { .. } | RecorderEvent::Paused | RecorderEvent::Resumed => Ok(()),
        }
    }

    /// The assistant round trip for `turn` finished
    ///
    /// # Errors
    ///
    /// Returns error only for fatal failures
    pub async fn on_upload_finished(
        &mut self,
        turn: u64,
        result: Result<AssistantReply, UploadError>,
    ) -> Result<(), VoiceError> {
        if turn != self.turn.id() || self.state() != TurnState::Uploading {
            tracing::debug!(turn, "dropping stale upload result");
            return Ok(());
        }
        self.in_flight = None;

        match result {
            Ok(reply) => {
                self.events.emit(VoiceEvent::TranscriptReceived {
                    turn,
                    transcription: reply.transcription,
                    response_text: reply.response_text,
                });

                self.turn.should_continue = reply.continue_conversation;
                let audio = reply.audio.to_path_buf();
                self.turn.response_audio = Some(reply.audio);
                self.set_state(TurnState::Playing);
                self.spawn_playback(audio);
                Ok(())
            }
            Err(e) => self.fail_turn(VoiceError::UploadFailed(e)).await,
        }
    }

    /// Reply playback for `turn` finished
    ///
    /// # Errors
    ///
    /// Returns error only for fatal failures
    pub async fn on_playback_finished(
        &mut self,
        turn: u64,
        result: Result<(), PlaybackError>,
    ) -> Result<(), VoiceError> {
        if turn != self.turn.id() || self.state() != TurnState::Playing {
            tracing::debug!(turn, "dropping stale playback result");
            return Ok(());
        }
        self.in_flight = None;

        if let Err(e) = result {
            return self.fail_turn(VoiceError::PlaybackFailed(e)).await;
        }

        let continuing = self.turn.should_continue();
        self.turn.cleanup();
        self.set_state(TurnState::Idle);
        self.events.emit(VoiceEvent::TurnCompleted { turn, continuing });

        if continuing {
            // no wake word between turns of one dialogue
            self.start_recording(TurnTrigger::Continuation).await
        } else {
            self.resume_listening()
        }
    }

    /// Tear everything down: pending request, player, then the microphone
    pub async fn shutdown(&mut self) {
        tracing::info!(turn = self.turn.id(), state = %self.state(), "shutting down conversation");
        self.teardown().await;
        self.arbiter.release_all().await;
    }

    async fn start_recording(&mut self, trigger: TurnTrigger) -> Result<(), VoiceError> {
        if !self.permission.capture_granted() {
            tracing::warn!(?trigger, "capture permission missing, aborting turn");
            self.report_error(None, &VoiceError::PermissionDenied);
            return self.resume_listening();
        }

        let id = self.allocate_turn_id();
        let path = match self.store.next_path(id) {
            Ok(path) => path,
            Err(e) => {
                self.report_error(Some(id), &VoiceError::from(e));
                return self.resume_listening();
            }
        };

        match self.arbiter.request_recorder_start(&path, self.format).await {
            Ok(RecorderStart::Started) => {
                self.turn = ConversationTurn::new(id, trigger);
                self.turn.audio_file = Some(path);
                self.set_state(TurnState::Recording);
                Ok(())
            }
            Ok(RecorderStart::AlreadyActive) => {
                tracing::debug!("recorder already active");
                Ok(())
            }
            Ok(RecorderStart::Aborted) => {
                // the recording that won the race reports itself through its own events
                tracing::info!(turn = id, "recording start aborted");
                Ok(())
            }
            Err(e) => {
                self.report_error(Some(id), &VoiceError::from(e));
                self.resume_listening()
            }
        }
    }

    fn resume_listening(&mut self) -> Result<(), VoiceError> {
        match self.arbiter.request_listener_start() {
            Ok(()) => Ok(()),
            Err(ArbiterError::Busy) => {
                tracing::debug!("recorder holds the microphone, listener stays paused");
                Ok(())
            }
            Err(e) => {
                let err = VoiceError::from(e);
                self.report_error(None, &err);
                Err(err)
            }
        }
    }

    async fn fail_turn(&mut self, err: VoiceError) -> Result<(), VoiceError> {
        let turn = self.turn.id();
        tracing::warn!(turn, state = %self.state(), error = %err, "turn failed");

        self.teardown().await;
        self.report_error(Some(turn), &err);

        if err.is_fatal() {
            return Err(err);
        }
        self.resume_listening()
    }

    /// Cleanup shared by every exit path; ends at `Idle` with the recorder released
    async fn teardown(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
            tracing::debug!("cancelled pending assistant request");
        }
        self.player.stop();
        self.turn.cleanup();

        if self.arbiter.owner() == MicOwner::Recorder {
            self.arbiter.request_recorder_stop().await;
        }
        self.set_state(TurnState::Idle);
    }

    fn spawn_upload(&mut self, path: PathBuf) {
        let uploader = Arc::clone(&self.uploader);
        let signals = self.signals.clone();
        let turn = self.turn.id();

        self.in_flight = Some(tokio::spawn(async move {
            let result = uploader.upload(&path).await;
            signals.send(Signal::UploadFinished { turn, result });
        }));
    }

    fn spawn_playback(&mut self, audio: PathBuf) {
        let player = Arc::clone(&self.player);
        let signals = self.signals.clone();
        let turn = self.turn.id();

        self.in_flight = Some(tokio::spawn(async move {
            let result = player.play(&audio).await;
            signals.send(Signal::PlaybackFinished { turn, result });
        }));
    }

    fn allocate_turn_id(&mut self) -> u64 {
        let id = self.next_turn_id;
        self.next_turn_id += 1;
        id
    }

    fn set_state(&mut self, state: TurnState) {
        let from = self.turn.state();
        if from == state {
            return;
        }

        tracing::info!(turn = self.turn.id(), %from, to = %state, "turn state changed");
        self.turn.state = state;
        self.events.emit(VoiceEvent::TurnStateChanged {
            turn: self.turn.id(),
            state,
        });
    }

    fn report_error(&self, turn: Option<u64>, err: &VoiceError) {
        self.events.emit(VoiceEvent::TurnError {
            turn,
            message: err.user_message(),
        });
    }
}
