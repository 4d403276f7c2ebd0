//! Capture permission checks

use cpal::traits::HostTrait;

/// Whether microphone capture is currently allowed
pub trait CapturePermission: Send + Sync {
    /// Checked before every recording
    fn capture_granted(&self) -> bool;
}

/// Granted when capture is enabled and an input device is present
#[derive(Debug, Clone, Copy)]
pub struct InputDevicePermission {
    permitted: bool,
}

impl InputDevicePermission {
    /// Create a check gated by the `capture_permitted` setting
    #[must_use]
    pub const fn new(permitted: bool) -> Self {
        Self { permitted }
    }
}

impl CapturePermission for InputDevicePermission {
    fn capture_granted(&self) -> bool {
        if !self.permitted {
            tracing::debug!("capture disabled by configuration");
            return false;
        }

        let available = cpal::default_host().default_input_device().is_some();
        if !available {
            tracing::warn!("no input device available for capture");
        }
        available
    }
}

/// Fixed answer
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub bool);

impl CapturePermission for StaticPermission {
    fn capture_granted(&self) -> bool {
        self.0
    }
}
