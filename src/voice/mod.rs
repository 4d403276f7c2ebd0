//! Voice collaborators
//!
//! The pieces that touch hardware or the network: wake word listening,
//! recording, the assistant upload, reply playback and capture permission.
//! Each sits behind a trait so the arbiter and the orchestrator can be
//! driven by fakes.

mod capture;
mod permission;
mod playback;
mod storage;
mod stt;
mod upload;
mod wake_word;

pub use capture::{
    CaptureError, CaptureFormat, PROGRESS_INTERVAL, Recorder, RecorderEvent, SAMPLE_RATE,
    WavRecorder, peak_amplitude, samples_to_wav,
};
pub use permission::{CapturePermission, InputDevicePermission, StaticPermission};
pub use playback::{PlaybackError, Player, SpeakerPlayer};
pub use storage::RecordingStore;
pub use stt::{DEFAULT_STT_URL, SpeechToText};
pub use upload::{AssistantReply, HttpUploader, NetworkFailure, UploadError, Uploader};
pub use wake_word::{
    DetectionCallback, EngineError, KeywordWakeEngine, LISTEN_SAMPLE_RATE, SegmenterState,
    SpeechSegmenter, WakeWordEngine, match_keyword, normalize_keywords,
};

/// Run a blocking thread handshake from inside or outside the runtime
///
/// On a multi-threaded runtime the worker is handed off first so other
/// tasks keep running. `block_in_place` panics on a current-thread runtime,
/// where the call runs directly instead.
pub(crate) fn blocking<T>(f: impl FnOnce() -> T) -> T {
    use tokio::runtime::{Handle, RuntimeFlavor};

    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}
