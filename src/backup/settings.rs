use super::error::ControlError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where to copy from, where to copy to, and how often.
///
/// Field names on disk match the `backup_settings.json` written by earlier
/// versions of the application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct BackupSettings {
    #[serde(rename = "SourcePath")]
    pub source_root: PathBuf,

    #[serde(rename = "DestinationPath")]
    pub destination_root: PathBuf,

    /// Values that do not fit are rejected when the JSON is read.
    pub interval_minutes: u32,
}

impl BackupSettings {
    pub fn new(
        source_root: impl Into<PathBuf>,
        destination_root: impl Into<PathBuf>,
        interval_minutes: u32,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            interval_minutes,
        }
    }

    /// Reject settings the scheduler cannot run with. Nothing is defaulted.
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.source_root.as_os_str().is_empty() {
            return Err(ControlError::InvalidSettings(
                "source path must not be empty".to_string(),
            ));
        }
        if self.destination_root.as_os_str().is_empty() {
            return Err(ControlError::InvalidSettings(
                "destination path must not be empty".to_string(),
            ));
        }
        if self.interval_minutes == 0 {
            return Err(ControlError::InvalidSettings(
                "interval must be a positive number of minutes".to_string(),
            ));
        }
        Ok(())
    }

    /// Repeat period, given the length of one interval unit (a minute in production).
    pub fn period(&self, unit: Duration) -> Duration {
        unit.saturating_mul(self.interval_minutes)
    }
}
