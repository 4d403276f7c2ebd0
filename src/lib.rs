//! voicegate - voice front end for a remote assistant
//!
//! Arbitrates one microphone between a wake word listener and a recorder,
//! reacts to sustained silence and to a rapid button press pattern, and runs
//! the record, upload, play, continue conversation loop.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  wake word │ key presses │ recorder │ upload │ playback │
//! └─────────────────────────┬──────────────────────────────┘
//!                           │ Signal (single serialized queue)
//! ┌─────────────────────────▼──────────────────────────────┐
//! │                     VoiceService                        │
//! │   SilenceGate │ PressPatternDetector │ Orchestrator     │
//! └─────────────────────────┬──────────────────────────────┘
//!                           │
//! ┌─────────────────────────▼──────────────────────────────┐
//! │       MicrophoneArbiter (None / Listener / Recorder)    │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Lifecycle events are published on an [`EventBus`] for UI and
//! notification layers.

pub mod config;
pub mod conversation;
pub mod detect;
pub mod error;
pub mod events;
pub mod input;
pub mod mic;
pub mod service;
pub mod signal;
pub mod voice;

pub use config::Config;
pub use conversation::{
    Collaborators, ConversationOrchestrator, ConversationTurn, StopReason, TurnState, TurnTrigger,
};
pub use detect::{PressPatternDetector, SilenceGate, WindowBoundary};
pub use error::{Error, Result, VoiceError};
pub use events::{EventBus, LifecycleEvent, VoiceEvent};
pub use mic::{ArbiterConfig, ArbiterError, MicOwner, MicrophoneArbiter, RecorderStart};
pub use service::{ActivityHold, NoHold, VoiceService};
pub use signal::{Signal, SignalReceiver, SignalSender};
