//! Rapid button press pattern detection

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Presses needed inside the window
pub const DEFAULT_PRESS_COUNT: usize = 4;

/// Length of the trailing window
pub const DEFAULT_PRESS_WINDOW_MS: u64 = 2000;

/// How a press lying exactly on the window's lower edge is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowBoundary {
    /// A press at `now - window` has expired
    #[default]
    Exclusive,
    /// A press at `now - window` still counts
    Inclusive,
}

impl WindowBoundary {
    /// Whether a press at `timestamp` has left a window ending at `now`
    const fn is_expired(self, timestamp: u64, now: u64, window_ms: u64) -> bool {
        let cutoff = now.saturating_sub(window_ms);
        match self {
            Self::Exclusive => timestamp <= cutoff && now >= window_ms,
            Self::Inclusive => timestamp < cutoff,
        }
    }
}

impl std::str::FromStr for WindowBoundary {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exclusive" => Ok(Self::Exclusive),
            "inclusive" => Ok(Self::Inclusive),
            other => Err(format!("unknown window boundary: {other}")),
        }
    }
}

/// Counts presses in a sliding window and fires when enough arrive
#[derive(Debug, Clone)]
pub struct PressPatternDetector {
    required_count: usize,
    window_ms: u64,
    boundary: WindowBoundary,
    presses: VecDeque<u64>,
}

impl Default for PressPatternDetector {
    fn default() -> Self {
        Self::new(DEFAULT_PRESS_COUNT, DEFAULT_PRESS_WINDOW_MS)
    }
}

impl PressPatternDetector {
    /// Create a detector with the exclusive boundary policy
    #[must_use]
    pub fn new(required_count: usize, window_ms: u64) -> Self {
        Self::with_boundary(required_count, window_ms, WindowBoundary::default())
    }

    /// Create a detector with an explicit boundary policy
    #[must_use]
    pub fn with_boundary(required_count: usize, window_ms: u64, boundary: WindowBoundary) -> Self {
        Self {
            required_count: required_count.max(1),
            window_ms,
            boundary,
            presses: VecDeque::with_capacity(required_count),
        }
    }

    /// Record a press at `now_ms`
    ///
    /// Returns true when the pattern completes. The stored presses are
    /// consumed so the same presses can never fire twice.
    pub fn add_press(&mut self, now_ms: u64) -> bool {
        self.expire(now_ms);
        self.presses.push_back(now_ms);

        tracing::debug!(
            presses = self.presses.len(),
            required = self.required_count,
            "press added"
        );

        if self.presses.len() >= self.required_count {
            self.presses.clear();
            tracing::debug!("press pattern detected");
            return true;
        }

        false
    }

    /// Forget every stored press
    pub fn reset(&mut self) {
        self.presses.clear();
    }

    /// Presses currently inside the window
    #[must_use]
    pub fn pending(&self) -> usize {
        self.presses.len()
    }

    /// Boundary policy in use
    #[must_use]
    pub const fn boundary(&self) -> WindowBoundary {
        self.boundary
    }

    fn expire(&mut self, now_ms: u64) {
        // oldest-first, so stop at the first press still inside the window
        while let Some(&oldest) = self.presses.front() {
            if self.boundary.is_expired(oldest, now_ms, self.window_ms) {
                self.presses.pop_front();
            } else {
                break;
            }
        }
    }
}
