//! Local signal detectors
//!
//! Both detectors turn a raw signal stream plus a caller-supplied clock into
//! a boolean trigger. They never fail and never touch the microphone.

mod pattern;
mod silence;

pub use pattern::{DEFAULT_PRESS_COUNT, DEFAULT_PRESS_WINDOW_MS, PressPatternDetector, WindowBoundary};
pub use silence::{DEFAULT_SILENCE_DURATION_MS, DEFAULT_SILENCE_THRESHOLD, MAX_AMPLITUDE, SilenceGate};
