use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Rejections from the control interface. None of these change state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("invalid backup settings: {0}")]
    InvalidSettings(String),

    #[error("backup process is already running")]
    AlreadyRunning,

    #[error("backup settings must be initialized before starting")]
    NotConfigured,

    #[error("backup process is not running")]
    NotRunning,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CopyError {
    #[error("source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("destination not writable: {}: {message}", .path.display())]
    DestinationUnwritable { path: PathBuf, message: String },

    #[error("i/o error on {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("copy of {} does not match its source", .0.display())]
    VerificationFailed(PathBuf),

    #[error("copy task aborted: {0}")]
    Aborted(String),
}

impl CopyError {
    /// Classify an error raised while reading the source file.
    pub fn from_source(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => CopyError::SourceNotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => CopyError::PermissionDenied(path.to_path_buf()),
            _ => CopyError::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        }
    }

    /// Classify an error raised while creating or writing the destination.
    pub fn from_destination(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => CopyError::PermissionDenied(path.to_path_buf()),
            _ => CopyError::DestinationUnwritable {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        }
    }
}

/// Errors that abort a whole cycle rather than a single file
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CycleError {
    #[error("tracked file list unavailable: {0}")]
    TrackedFilesUnavailable(String),
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;
