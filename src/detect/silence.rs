//! Sustained silence detection
//!
//! Watches the amplitude samples the recorder reports while capturing and
//! fires once when they have stayed below a threshold for long enough.

/// Largest amplitude a recorder reports (peak of a signed 16-bit sample)
pub const MAX_AMPLITUDE: u16 = 32767;

/// Amplitude below which a sample counts as silence
///
/// Roughly: 0-100 complete silence, 100-500 quiet background noise,
/// 500-1000 quiet room, 1000-5000 normal speech.
pub const DEFAULT_SILENCE_THRESHOLD: u16 = 500;

/// How long silence must persist before the gate fires
pub const DEFAULT_SILENCE_DURATION_MS: u64 = 2500;

/// Flags sustained silence in an amplitude stream
#[derive(Debug, Clone)]
pub struct SilenceGate {
    threshold: u16,
    duration_ms: u64,
    enabled: bool,
    silence_started_at: Option<u64>,
}

impl Default for SilenceGate {
    fn default() -> Self {
        Self::new(DEFAULT_SILENCE_THRESHOLD, DEFAULT_SILENCE_DURATION_MS)
    }
}

impl SilenceGate {
    /// Create a disabled gate
    #[must_use]
    pub const fn new(threshold: u16, duration_ms: u64) -> Self {
        Self {
            threshold,
            duration_ms,
            enabled: false,
            silence_started_at: None,
        }
    }

    /// Turn detection on and forget any previous span
    pub fn enable(&mut self) {
        self.enabled = true;
        self.reset();
        tracing::debug!(
            threshold = self.threshold,
            duration_ms = self.duration_ms,
            "silence detection enabled"
        );
    }

    /// Turn detection off
    pub fn disable(&mut self) {
        self.enabled = false;
        self.reset();
    }

    /// Forget the current silence span
    pub const fn reset(&mut self) {
        self.silence_started_at = None;
    }

    /// Feed one amplitude sample taken at `now_ms`
    ///
    /// Returns true exactly once per qualifying span. Always false while
    /// disabled.
    pub fn check(&mut self, amplitude: u16, now_ms: u64) -> bool {
        if !self.enabled {
            return false;
        }

        if amplitude >= self.threshold {
            if self.silence_started_at.take().is_some() {
                tracing::debug!(amplitude, threshold = self.threshold, "silence interrupted");
            }
            return false;
        }

        let started = *self.silence_started_at.get_or_insert_with(|| {
            tracing::debug!(amplitude, threshold = self.threshold, "silence started");
            now_ms
        });

        let elapsed = now_ms.saturating_sub(started);
        if elapsed < self.duration_ms {
            return false;
        }

        tracing::debug!(
            elapsed_ms = elapsed,
            duration_ms = self.duration_ms,
            amplitude,
            "silence detected"
        );
        self.reset();
        true
    }

    /// Whether the gate is currently enabled
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start of the active silence span, if any
    #[must_use]
    pub const fn silence_started_at(&self) -> Option<u64> {
        self.silence_started_at
    }

    /// Amplitude threshold
    #[must_use]
    pub const fn threshold(&self) -> u16 {
        self.threshold
    }

    /// Required silence duration in milliseconds
    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}
