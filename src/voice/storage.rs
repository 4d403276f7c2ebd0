//! Where recordings are written

use std::path::{Path, PathBuf};

use chrono::Utc;

use super::capture::CaptureError;

/// Names and places recording files
#[derive(Debug, Clone)]
pub struct RecordingStore {
    dir: PathBuf,
}

impl RecordingStore {
    /// Store recordings under `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Recording directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for the recording of `turn`, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn next_path(&self, turn: u64) -> Result<PathBuf, CaptureError> {
        std::fs::create_dir_all(&self.dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        Ok(self.dir.join(format!("rec-{stamp}-{turn}.wav")))
    }
}
