pub mod copier;
pub mod cycle;
pub mod error;
pub mod limiter;
pub mod manager;
pub mod scheduler;
pub mod settings;

pub use copier::{Copier, FileCopier};
pub use cycle::{BackupCycle, TrackedFileListProvider};
pub use error::{Cancelled, ControlError, CopyError, CycleError};
pub use limiter::{ConcurrencyLimiter, SlotGuard};
pub use manager::{BackupManager, BackupStatus};
pub use scheduler::Scheduler;
pub use settings::BackupSettings;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Default number of simultaneous file copies per cycle
pub const DEFAULT_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyStatus {
    Success { bytes: u64 },
    Skipped(String),
    Failed(CopyError),
    Cancelled,
}

/// Result of copying one tracked file
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    /// Tracked entry as it appears in the list
    pub path: PathBuf,
    pub destination: Option<PathBuf>,
    pub status: CopyStatus,
}

impl CopyOutcome {
    pub fn new(path: impl Into<PathBuf>, destination: Option<PathBuf>, status: CopyStatus) -> Self {
        Self {
            path: path.into(),
            destination,
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, CopyStatus::Success { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, CopyStatus::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, CopyStatus::Cancelled)
    }
}

/// Per-file outcomes of one full pass over the tracked list, in list order.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<CopyOutcome>,
}

impl CycleOutcome {
    /// Files for which a copy was dispatched or resolved
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, CopyStatus::Skipped(_)))
            .count()
    }

    pub fn cancelled(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_cancelled()).count()
    }

    pub fn succeeded_paths(&self) -> Vec<&Path> {
        self.outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.path.as_path())
            .collect()
    }

    pub fn failed_paths(&self) -> Vec<&Path> {
        self.outcomes
            .iter()
            .filter(|o| o.is_failed())
            .map(|o| o.path.as_path())
            .collect()
    }

    pub fn has_partial_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn summary(&self) -> CycleSummary {
        CycleSummary {
            cycle_id: self.cycle_id,
            started_at: self.started_at.timestamp(),
            finished_at: self.finished_at.timestamp(),
            attempted: self.attempted(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            skipped: self.skipped(),
            cancelled: self.cancelled(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub started_at: i64,
    pub finished_at: i64,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone)]
pub enum Event {
    BackupStarted,
    BackupStopped,
    CycleStarted { cycle_id: Uuid },
    CycleCompleted(CycleSummary),
    CycleFailed { cycle_id: Uuid, message: String },
}
