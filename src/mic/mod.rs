//! Microphone arbitration

mod arbiter;

pub use arbiter::{
    ArbiterConfig, ArbiterError, DEFAULT_RECORDER_GUARD, DEFAULT_SETTLE_DELAY, MicOwner,
    MicrophoneArbiter, RecorderStart,
};
