use super::copier::Copier;
use super::error::{CopyError, CycleError};
use super::limiter::ConcurrencyLimiter;
use super::settings::BackupSettings;
use super::{CopyOutcome, CopyStatus, CycleOutcome};
use crate::utils::log_buffer::LogBuffer;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Supplies the ordered list of paths to back up, read once per cycle.
#[async_trait]
pub trait TrackedFileListProvider: Send + Sync {
    async fn tracked_files(&self) -> Result<Vec<PathBuf>>;
}

/// One full pass over the tracked file list.
///
/// Copies are dispatched in list order as separate tasks. Each dispatch
/// first takes a slot from this cycle's own limiter, and the cycle returns
/// only after every dispatched copy has settled.
pub struct BackupCycle {
    id: Uuid,
    copier: Arc<dyn Copier>,
    limiter: ConcurrencyLimiter,
    log_buffer: Option<LogBuffer>,
}

impl BackupCycle {
    pub fn new(copier: Arc<dyn Copier>, capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            copier,
            limiter: ConcurrencyLimiter::new(capacity),
            log_buffer: None,
        }
    }

    pub fn with_log_buffer(mut self, log_buffer: LogBuffer) -> Self {
        self.log_buffer = Some(log_buffer);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn run(
        &self,
        files: &dyn TrackedFileListProvider,
        settings: &BackupSettings,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome, CycleError> {
        let started_at = Utc::now();
        info!("Cycle {} started", self.id);

        let tracked = match files.tracked_files().await {
            Ok(tracked) => tracked,
            Err(e) => {
                error!("Cycle {} aborted, tracked file list unreadable: {:#}", self.id, e);
                self.log("error", format!("Backup aborted: cannot read tracked files: {:#}", e), None);
                return Err(CycleError::TrackedFilesUnavailable(format!("{:#}", e)));
            }
        };

        self.log(
            "info",
            format!("Backing up {} files to {}", tracked.len(), settings.destination_root.display()),
            None,
        );

        let mut pending = Vec::with_capacity(tracked.len());
        for path in tracked {
            let Some(name) = path.file_name() else {
                pending.push(Dispatch::Settled(CopyOutcome::new(
                    path,
                    None,
                    CopyStatus::Skipped("path has no file name".to_string()),
                )));
                continue;
            };
            let source = settings.source_root.join(&path);
            let destination = settings.destination_root.join(name);

            // Slots are taken here, not inside the task, so copies start in list order.
            let slot = match self.limiter.acquire(cancel).await {
                Ok(slot) => slot,
                Err(_) => {
                    pending.push(Dispatch::Settled(CopyOutcome::new(
                        path,
                        Some(destination),
                        CopyStatus::Cancelled,
                    )));
                    continue;
                }
            };

            let copier = Arc::clone(&self.copier);
            let cancel = cancel.clone();
            let target = destination.clone();
            let handle = tokio::spawn(async move {
                let _slot = slot;
                copier.copy(&source, &target, &cancel).await.status
            });
            pending.push(Dispatch::Spawned { path, destination, handle });
        }

        let statuses = futures::future::join_all(pending.into_iter().map(Dispatch::settle)).await;

        let mut outcomes = Vec::with_capacity(statuses.len());
        for outcome in statuses {
            self.log_outcome(&outcome);
            outcomes.push(outcome);
        }

        let outcome = CycleOutcome {
            cycle_id: self.id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };

        info!(
            "Cycle {} finished: {} attempted, {} succeeded, {} failed, {} skipped, {} cancelled",
            self.id,
            outcome.attempted(),
            outcome.succeeded(),
            outcome.failed(),
            outcome.skipped(),
            outcome.cancelled()
        );
        self.log(
            if outcome.has_partial_failures() { "warn" } else { "info" },
            format!(
                "Backup cycle finished: {} of {} files copied",
                outcome.succeeded(),
                outcome.attempted()
            ),
            None,
        );

        Ok(outcome)
    }

    fn log_outcome(&self, outcome: &CopyOutcome) {
        let path = outcome.path.display().to_string();
        match &outcome.status {
            CopyStatus::Success { bytes } => {
                debug!("Copied {} ({} bytes)", path, bytes);
                self.log("info", format!("File {} copied", path), Some(path));
            }
            CopyStatus::Skipped(reason) => {
                warn!("Skipped {}: {}", path, reason);
                self.log("warn", format!("Skipped {}: {}", path, reason), Some(path));
            }
            CopyStatus::Failed(e) => {
                warn!("Failed to copy {}: {}", path, e);
                self.log("error", format!("Error copying {}: {}", path, e), Some(path));
            }
            CopyStatus::Cancelled => {
                debug!("Copy of {} cancelled", path);
            }
        }
    }

    fn log(&self, level: &str, message: String, path: Option<String>) {
        if let Some(log_buffer) = &self.log_buffer {
            log_buffer.add_log(level, message, path);
        }
    }
}

enum Dispatch {
    Settled(CopyOutcome),
    Spawned {
        path: PathBuf,
        destination: PathBuf,
        handle: tokio::task::JoinHandle<CopyStatus>,
    },
}

impl Dispatch {
    async fn settle(self) -> CopyOutcome {
        match self {
            Dispatch::Settled(outcome) => outcome,
            Dispatch::Spawned { path, destination, handle } => {
                let status = match handle.await {
                    Ok(status) => status,
                    Err(e) => CopyStatus::Failed(CopyError::Aborted(e.to_string())),
                };
                CopyOutcome::new(path, Some(destination), status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::copier::FileCopier;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct StaticList(Vec<PathBuf>);

    #[async_trait]
    impl TrackedFileListProvider for StaticList {
        async fn tracked_files(&self) -> Result<Vec<PathBuf>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenList;

    #[async_trait]
    impl TrackedFileListProvider for BrokenList {
        async fn tracked_files(&self) -> Result<Vec<PathBuf>> {
            Err(anyhow::anyhow!("selected_files.json is not valid JSON"))
        }
    }

    /// Sleeps instead of copying and records peak concurrency.
    #[derive(Default)]
    struct SlowCopier {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Copier for SlowCopier {
        async fn copy(
            &self,
            source: &Path,
            destination: &Path,
            cancel: &CancellationToken,
        ) -> CopyOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let status = tokio::select! {
                _ = cancel.cancelled() => CopyStatus::Cancelled,
                _ = tokio::time::sleep(Duration::from_millis(50)) => CopyStatus::Success { bytes: 0 },
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            CopyOutcome::new(source, Some(destination.to_path_buf()), status)
        }
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from(*n)).collect()
    }

    #[tokio::test]
    async fn test_missing_file_is_a_partial_failure() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::write(src.path().join("a.txt"), b"alpha").unwrap();

        let settings = BackupSettings::new(src.path(), dst.path(), 1);
        let cycle = BackupCycle::new(Arc::new(FileCopier::new()), 3);
        let outcome = cycle
            .run(&StaticList(paths(&["a.txt", "b.txt"])), &settings, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempted(), 2);
        assert_eq!(outcome.succeeded_paths(), vec![Path::new("a.txt")]);
        assert_eq!(outcome.failed_paths(), vec![Path::new("b.txt")]);
        assert!(outcome.has_partial_failures());
        assert_eq!(std::fs::read(dst.path().join("a.txt")).unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_files() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        for name in ["one.txt", "three.txt", "four.txt"] {
            std::fs::write(src.path().join(name), name).unwrap();
        }

        let settings = BackupSettings::new(src.path(), dst.path(), 1);
        let cycle = BackupCycle::new(Arc::new(FileCopier::new()), 1);
        let outcome = cycle
            .run(
                &StaticList(paths(&["one.txt", "two.txt", "three.txt", "four.txt"])),
                &settings,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.succeeded(), 3);
        assert_eq!(outcome.failed(), 1);
        assert!(dst.path().join("four.txt").exists());
    }

    #[tokio::test]
    async fn test_destination_uses_basename() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("docs/2024")).unwrap();
        std::fs::write(src.path().join("docs/2024/plan.md"), b"# plan").unwrap();

        let settings = BackupSettings::new(src.path(), dst.path().join("backup"), 1);
        let cycle = BackupCycle::new(Arc::new(FileCopier::new()), 3);
        let outcome = cycle
            .run(&StaticList(paths(&["docs/2024/plan.md"])), &settings, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.succeeded(), 1);
        assert!(dst.path().join("backup").join("plan.md").exists());
    }

    #[tokio::test]
    async fn test_unreadable_list_is_fatal() {
        let settings = BackupSettings::new("/tmp/src", "/tmp/dst", 1);
        let copier = Arc::new(SlowCopier::default());
        let cycle = BackupCycle::new(copier.clone(), 3);

        let result = cycle.run(&BrokenList, &settings, &CancellationToken::new()).await;

        assert!(matches!(result, Err(CycleError::TrackedFilesUnavailable(_))));
        assert_eq!(copier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_never_exceeds_capacity() {
        let settings = BackupSettings::new("/src", "/dst", 1);
        let copier = Arc::new(SlowCopier::default());
        let cycle = BackupCycle::new(copier.clone(), 2);

        let outcome = cycle
            .run(
                &StaticList(paths(&["1", "2", "3", "4", "5"])),
                &settings,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.succeeded(), 5);
        assert_eq!(copier.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_settles_every_copy() {
        let settings = BackupSettings::new("/src", "/dst", 1);
        let copier = Arc::new(SlowCopier::default());
        let cycle = BackupCycle::new(copier.clone(), 2);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = cycle
            .run(&StaticList(paths(&["1", "2", "3", "4", "5", "6"])), &settings, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.attempted(), 6);
        assert_eq!(outcome.cancelled(), 6);
        assert_eq!(copier.active.load(Ordering::SeqCst), 0);
        assert!(copier.calls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_outcomes_follow_list_order() {
        let settings = BackupSettings::new("/src", "/dst", 1);
        let cycle = BackupCycle::new(Arc::new(SlowCopier::default()), 3);
        let outcome = cycle
            .run(&StaticList(paths(&["c", "a", "b", ".."])), &settings, &CancellationToken::new())
            .await
            .unwrap();

        let order: Vec<_> = outcome.outcomes.iter().map(|o| o.path.clone()).collect();
        assert_eq!(order, paths(&["c", "a", "b", ".."]));
        assert_eq!(outcome.skipped(), 1);
    }

    /// Records the order in which copies begin.
    #[derive(Default)]
    struct RecordingCopier {
        started: parking_lot::Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl Copier for RecordingCopier {
        async fn copy(
            &self,
            source: &Path,
            destination: &Path,
            _cancel: &CancellationToken,
        ) -> CopyOutcome {
            self.started.lock().push(source.to_path_buf());
            tokio::task::yield_now().await;
            CopyOutcome::new(source, Some(destination.to_path_buf()), CopyStatus::Success { bytes: 0 })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_copies_start_in_list_order() {
        let settings = BackupSettings::new("/src", "/dst", 1);
        let names: Vec<String> = (0..50).map(|i| format!("f{:03}", i)).collect();
        let tracked: Vec<PathBuf> = names.iter().map(PathBuf::from).collect();
        let expected: Vec<PathBuf> = tracked.iter().map(|p| Path::new("/src").join(p)).collect();

        for _ in 0..10 {
            let copier = Arc::new(RecordingCopier::default());
            let cycle = BackupCycle::new(copier.clone(), 1);
            let outcome = cycle
                .run(&StaticList(tracked.clone()), &settings, &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(outcome.succeeded(), 50);
            assert_eq!(*copier.started.lock(), expected);
        }
    }

    #[tokio::test]
    async fn test_cycle_logs_to_buffer() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::write(src.path().join("a.txt"), b"alpha").unwrap();
        let buffer = LogBuffer::new(100);

        let settings = BackupSettings::new(src.path(), dst.path(), 1);
        let cycle = BackupCycle::new(Arc::new(FileCopier::new()), 3).with_log_buffer(buffer.clone());
        cycle
            .run(&StaticList(paths(&["a.txt", "b.txt"])), &settings, &CancellationToken::new())
            .await
            .unwrap();

        let logs = buffer.get_logs(None);
        assert!(logs.iter().any(|l| l.level == "info" && l.path.as_deref() == Some("a.txt")));
        assert!(logs.iter().any(|l| l.level == "error" && l.path.as_deref() == Some("b.txt")));
    }
}
