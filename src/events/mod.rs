//! Lifecycle events for UI and notification layers
//!
//! The core never calls into a UI. It publishes [`LifecycleEvent`]s on an
//! [`EventBus`] and interested layers register by calling
//! [`EventBus::subscribe`]. Publishing is best-effort: with no subscribers
//! the event is dropped.

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::conversation::TurnState;
use crate::mic::MicOwner;

/// Broadcast capacity; slow subscribers lag instead of blocking the core
const CHANNEL_CAPACITY: usize = 256;

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceEvent {
    /// Recorder reported that capture began
    RecordingStarted { path: PathBuf },
    /// Recorder finalized its file
    RecordingStopped { path: PathBuf },
    /// Wake word listener holds the microphone again
    ListeningResumed,
    /// Wake word listener released the microphone
    ListeningPaused,
    /// Microphone ownership changed
    MicOwnerChanged { owner: MicOwner },
    /// A recording took the microphone from `holder` without a handover
    MicContention { holder: MicOwner },
    /// Conversation turn moved to a new state
    TurnStateChanged { turn: u64, state: TurnState },
    /// Assistant metadata for a turn (informational only)
    TranscriptReceived {
        turn: u64,
        transcription: Option<String>,
        response_text: Option<String>,
    },
    /// A turn ended with an error; `message` is short and user-facing
    TurnError { turn: Option<u64>, message: String },
    /// A turn finished its reply playback
    TurnCompleted { turn: u64, continuing: bool },
    /// The silence gate stopped the recording
    SilenceDetected,
    /// The button press pattern fired
    PatternDetected,
}

impl VoiceEvent {
    /// Dotted name used in logs and JSON output
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RecordingStarted { .. } => "voicegate.recording.started",
            Self::RecordingStopped { .. } => "voicegate.recording.stopped",
            Self::ListeningResumed => "voicegate.listening.resumed",
            Self::ListeningPaused => "voicegate.listening.paused",
            Self::MicOwnerChanged { .. } => "voicegate.mic.owner_changed",
            Self::MicContention { .. } => "voicegate.mic.contention",
            Self::TurnStateChanged { .. } => "voicegate.turn.state_changed",
            Self::TranscriptReceived { .. } => "voicegate.turn.transcript",
            Self::TurnError { .. } => "voicegate.turn.error",
            Self::TurnCompleted { .. } => "voicegate.turn.completed",
            Self::SilenceDetected => "voicegate.detector.silence",
            Self::PatternDetected => "voicegate.detector.pattern",
        }
    }
}

/// An event with identity and time attached
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    /// Unique event ID (UUID v4)
    pub id: String,
    /// ISO 8601 timestamp
    pub timestamp: String,
    /// Payload
    #[serde(flatten)]
    pub event: VoiceEvent,
}

impl LifecycleEvent {
    /// Wrap an event with an auto-generated `id` and `timestamp`
    #[must_use]
    pub fn new(event: VoiceEvent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            event,
        }
    }
}

/// Typed publish/subscribe channel for lifecycle events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with no subscribers
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Register a subscriber
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Publish an event
    pub fn emit(&self, event: VoiceEvent) {
        tracing::trace!(event = event.name(), "lifecycle event");
        // no subscribers is fine
        let _ = self.tx.send(LifecycleEvent::new(event));
    }

    /// Number of registered subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(VoiceEvent::ListeningResumed);
        bus.emit(VoiceEvent::TurnCompleted {
            turn: 3,
            continuing: true,
        });

        assert_eq!(rx.try_recv().unwrap().event, VoiceEvent::ListeningResumed);
        assert_eq!(
            rx.try_recv().unwrap().event,
            VoiceEvent::TurnCompleted {
                turn: 3,
                continuing: true
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(VoiceEvent::SilenceDetected);
    }

    #[test]
    fn serializes_with_type_tag() {
        let event = LifecycleEvent::new(VoiceEvent::TurnError {
            turn: Some(1),
            message: "Server error (500)".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "turn_error");
        assert_eq!(json["turn"], 1);
        assert_eq!(json["message"], "Server error (500)");
        assert!(json["id"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn owner_changes_serialize_snake_case() {
        let json = serde_json::to_value(VoiceEvent::MicOwnerChanged {
            owner: MicOwner::WakeWordListener,
        })
        .unwrap();
        assert_eq!(json["owner"], "wake_word_listener");
    }
}
