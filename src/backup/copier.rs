use super::error::CopyError;
use super::{CopyOutcome, CopyStatus};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Chunk size for streamed copies; cancellation is checked between chunks.
pub const COPY_BUFFER_SIZE: usize = 81920;

/// Copies a single file. This is the unit of work dispatched by a cycle.
#[async_trait]
pub trait Copier: Send + Sync {
    async fn copy(
        &self,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> CopyOutcome;
}

/// Streams the source into a hidden temporary file next to the destination
/// and renames it into place only once every byte is written. Failed or
/// cancelled copies leave the previous destination untouched.
#[derive(Debug, Clone, Default)]
pub struct FileCopier {
    verify: bool,
}

enum StreamError {
    Cancelled,
    Failed(CopyError),
}

impl FileCopier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read each copy and compare its blake3 digest with the source stream.
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    async fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> CopyStatus {
        let metadata = match fs::metadata(source).await {
            Ok(m) => m,
            Err(e) => return CopyStatus::Failed(CopyError::from_source(source, e)),
        };
        if !metadata.is_file() {
            return CopyStatus::Skipped("not a regular file".to_string());
        }
        if cancel.is_cancelled() {
            return CopyStatus::Cancelled;
        }

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent).await {
                return CopyStatus::Failed(CopyError::from_destination(parent, e));
            }
        }

        let temp = temp_path_for(destination);
        let result = self.stream_to(source, &temp, cancel).await;

        let status = match result {
            Ok(bytes) => match fs::rename(&temp, destination).await {
                Ok(()) => return CopyStatus::Success { bytes },
                Err(e) => CopyStatus::Failed(CopyError::from_destination(destination, e)),
            },
            Err(StreamError::Cancelled) => CopyStatus::Cancelled,
            Err(StreamError::Failed(e)) => CopyStatus::Failed(e),
        };

        if let Err(e) = fs::remove_file(&temp).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial copy {}: {}", temp.display(), e);
            }
        }
        status
    }

    async fn stream_to(
        &self,
        source: &Path,
        temp: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, StreamError> {
        let mut reader = File::open(source)
            .await
            .map_err(|e| StreamError::Failed(CopyError::from_source(source, e)))?;
        let mut writer = File::create(temp)
            .await
            .map_err(|e| StreamError::Failed(CopyError::from_destination(temp, e)))?;

        let mut hasher = self.verify.then(blake3::Hasher::new);
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(StreamError::Cancelled);
            }
            let n = reader
                .read(&mut buffer)
                .await
                .map_err(|e| StreamError::Failed(CopyError::from_source(source, e)))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buffer[..n])
                .await
                .map_err(|e| StreamError::Failed(CopyError::from_destination(temp, e)))?;
            if let Some(h) = hasher.as_mut() {
                h.update(&buffer[..n]);
            }
            total += n as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| StreamError::Failed(CopyError::from_destination(temp, e)))?;
        writer
            .sync_all()
            .await
            .map_err(|e| StreamError::Failed(CopyError::from_destination(temp, e)))?;
        drop(writer);

        if let Some(h) = hasher {
            let expected = h.finalize();
            let written = hash_file(temp, cancel).await?;
            if written != expected {
                return Err(StreamError::Failed(CopyError::VerificationFailed(
                    source.to_path_buf(),
                )));
            }
        }

        Ok(total)
    }
}

#[async_trait]
impl Copier for FileCopier {
    async fn copy(
        &self,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> CopyOutcome {
        let status = self.copy_file(source, destination, cancel).await;
        debug!(
            "Copy {} -> {}: {:?}",
            source.display(),
            destination.display(),
            status
        );
        CopyOutcome::new(source, Some(destination.to_path_buf()), status)
    }
}

async fn hash_file(path: &Path, cancel: &CancellationToken) -> Result<blake3::Hash, StreamError> {
    let mut file = File::open(path)
        .await
        .map_err(|e| StreamError::Failed(CopyError::from_destination(path, e)))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        let n = file.read(&mut buffer).await.map_err(|e| {
            StreamError::Failed(CopyError::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize())
}

/// `dir/.name.<uuid>.partial`, unique per attempt so overlapping copies to
/// the same destination never share a temporary file.
fn temp_path_for(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    destination.with_file_name(format!(".{}.{}.partial", name, uuid::Uuid::new_v4().simple()))
}
