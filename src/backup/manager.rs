use super::copier::{Copier, FileCopier};
use super::cycle::TrackedFileListProvider;
use super::error::ControlError;
use super::scheduler::Scheduler;
use super::settings::BackupSettings;
use super::{CycleSummary, Event, SchedulerState};
use crate::utils::config::Config;
use crate::utils::log_buffer::{LogBuffer, LogEntry};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

/// Capacity of the broadcast event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Control interface for the presentation layer.
///
/// Validates settings and delegates lifecycle changes to the [`Scheduler`].
#[derive(Clone)]
pub struct BackupManager {
    settings: Arc<RwLock<Option<Arc<BackupSettings>>>>,
    scheduler: Scheduler,
    event_tx: broadcast::Sender<Event>,
    log_buffer: LogBuffer,
}

impl BackupManager {
    pub fn new(config: &Config, files: Arc<dyn TrackedFileListProvider>) -> Self {
        let copier = Arc::new(FileCopier::new().with_verification(config.verify_copies));
        Self::with_copier(config, files, copier)
    }

    pub fn with_copier(
        config: &Config,
        files: Arc<dyn TrackedFileListProvider>,
        copier: Arc<dyn Copier>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let log_buffer = LogBuffer::new(config.log_buffer_size);
        let scheduler = Scheduler::new(
            files,
            copier,
            config.max_concurrent_copies,
            event_tx.clone(),
            log_buffer.clone(),
        );

        Self {
            settings: Arc::new(RwLock::new(None)),
            scheduler,
            event_tx,
            log_buffer,
        }
    }

    /// Shorten the interval unit (tests and demos).
    pub fn with_interval_unit(mut self, unit: Duration) -> Self {
        self.scheduler = self.scheduler.with_interval_unit(unit);
        self
    }

    /// Validate and store settings for the next `start`.
    pub fn initialize(&self, settings: BackupSettings) -> Result<(), ControlError> {
        if let Err(e) = settings.validate() {
            warn!("Rejected backup settings: {}", e);
            self.log_buffer.add_log("error", e.to_string(), None);
            return Err(e);
        }
        if self.scheduler.state() != SchedulerState::Idle {
            return Err(ControlError::AlreadyRunning);
        }

        info!(
            "Backup settings: source {}, destination {}, every {} min",
            settings.source_root.display(),
            settings.destination_root.display(),
            settings.interval_minutes
        );
        *self.settings.write() = Some(Arc::new(settings));
        Ok(())
    }

    pub async fn start(&self) -> Result<(), ControlError> {
        if self.scheduler.is_running() {
            return Err(ControlError::AlreadyRunning);
        }
        let settings = self
            .settings
            .read()
            .clone()
            .ok_or(ControlError::NotConfigured)?;
        self.scheduler.start(settings).await
    }

    pub async fn stop(&self) -> Result<(), ControlError> {
        self.scheduler.stop().await
    }

    /// Start, keep running until `shutdown` resolves, then stop.
    ///
    /// A shutdown that arrives during the initial pass cancels it instead of
    /// waiting for it to finish.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), ControlError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let started = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown requested during the initial backup");
                false
            }
            result = self.start() => {
                result?;
                true
            }
        };
        if started {
            shutdown.await;
        }

        match self.stop().await {
            Ok(()) | Err(ControlError::NotRunning) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// All events. A receiver that falls more than
    /// [`EVENT_CHANNEL_CAPACITY`] events behind loses the oldest ones; use
    /// [`BackupManager::subscribe_lifecycle`] where start/stop must not be missed.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// `BackupStarted` and `BackupStopped`, each delivered exactly once.
    pub fn subscribe_lifecycle(&self) -> mpsc::UnboundedReceiver<Event> {
        self.scheduler.subscribe_lifecycle()
    }

    pub fn status(&self) -> BackupStatus {
        let settings = self
            .scheduler
            .active_settings()
            .or_else(|| self.settings.read().clone())
            .map(|s| (*s).clone());

        BackupStatus {
            state: self.scheduler.state(),
            settings,
            cycles_completed: self.scheduler.cycles_completed(),
            last_cycle: self.scheduler.last_cycle(),
        }
    }

    pub fn get_logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        self.log_buffer.get_logs(limit)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BackupStatus {
    pub state: SchedulerState,
    pub settings: Option<BackupSettings>,
    pub cycles_completed: u64,
    pub last_cycle: Option<CycleSummary>,
}
