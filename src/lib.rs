//! Recurring file backups: copies a tracked list of files into a destination
//! directory immediately on start and then on a fixed interval, with a
//! bounded number of concurrent copies per cycle.

pub mod backup;
pub mod store;
pub mod utils;

pub use backup::{
    BackupManager, BackupSettings, BackupStatus, ControlError, CycleOutcome, Event,
    SchedulerState,
};
