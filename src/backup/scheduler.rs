use super::copier::Copier;
use super::cycle::{BackupCycle, TrackedFileListProvider};
use super::error::ControlError;
use super::settings::BackupSettings;
use super::{CycleSummary, Event, SchedulerState};
use crate::utils::log_buffer::LogBuffer;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Length of one `interval_minutes` step
pub const MINUTE: Duration = Duration::from_secs(60);

/// Shortest accepted interval unit; the repeat timer cannot run with a zero period.
pub const MIN_INTERVAL_UNIT: Duration = Duration::from_millis(1);

/// Owns the Idle/Running/Stopping state machine and the recurring trigger.
///
/// A run is driven by a single task: it performs the initial pass, then
/// waits on one interval timer and runs each cycle to completion before
/// waiting again, so cycles never overlap.
///
/// Every event goes to the broadcast channel, whose receivers may lag and
/// lose events. `BackupStarted` and `BackupStopped` are also delivered to
/// each [`Scheduler::subscribe_lifecycle`] receiver, which never drops them.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Mutex<Inner>>,
    event_tx: broadcast::Sender<Event>,
    lifecycle: Arc<Mutex<Vec<mpsc::UnboundedSender<Event>>>>,
    files: Arc<dyn TrackedFileListProvider>,
    copier: Arc<dyn Copier>,
    capacity: usize,
    interval_unit: Duration,
    log_buffer: LogBuffer,
}

struct Inner {
    state: SchedulerState,
    run: Option<RunHandle>,
    settings: Option<Arc<BackupSettings>>,
    cycles_completed: u64,
    last_cycle: Option<CycleSummary>,
}

struct RunHandle {
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(
        files: Arc<dyn TrackedFileListProvider>,
        copier: Arc<dyn Copier>,
        capacity: usize,
        event_tx: broadcast::Sender<Event>,
        log_buffer: LogBuffer,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SchedulerState::Idle,
                run: None,
                settings: None,
                cycles_completed: 0,
                last_cycle: None,
            })),
            event_tx,
            lifecycle: Arc::new(Mutex::new(Vec::new())),
            files,
            copier,
            capacity,
            interval_unit: MINUTE,
            log_buffer,
        }
    }

    /// Shorten the interval unit (tests and demos). Clamped to [`MIN_INTERVAL_UNIT`].
    pub fn with_interval_unit(mut self, unit: Duration) -> Self {
        self.interval_unit = unit.max(MIN_INTERVAL_UNIT);
        self
    }

    /// Unbounded stream of `BackupStarted` / `BackupStopped` only.
    pub fn subscribe_lifecycle(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lifecycle.lock().push(tx);
        rx
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Settings of the current run
    pub fn active_settings(&self) -> Option<Arc<BackupSettings>> {
        self.inner.lock().settings.clone()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.inner.lock().cycles_completed
    }

    pub fn last_cycle(&self) -> Option<CycleSummary> {
        self.inner.lock().last_cycle
    }

    /// Enter Running, perform the initial pass, then arm the recurring trigger.
    ///
    /// Returns once the initial pass has settled.
    pub async fn start(&self, settings: Arc<BackupSettings>) -> Result<(), ControlError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock();
            if inner.state != SchedulerState::Idle {
                return Err(ControlError::AlreadyRunning);
            }

            info!(
                "Scheduler Idle -> Running: {} -> {} every {}",
                settings.source_root.display(),
                settings.destination_root.display(),
                humantime::format_duration(settings.period(self.interval_unit))
            );
            inner.state = SchedulerState::Running;
            inner.settings = Some(Arc::clone(&settings));
            inner.cycles_completed = 0;
            self.notify_lifecycle(Event::BackupStarted);

            let cancel = CancellationToken::new();
            let driver = tokio::spawn(self.clone().drive(settings, cancel.clone(), ready_tx));
            inner.run = Some(RunHandle { cancel, driver });
        }
        self.log_buffer
            .add_log("info", "Backup process started".to_string(), None);

        // The driver drops the sender only if it dies before the pass settles.
        if ready_rx.await.is_err() {
            warn!("Scheduler task ended before the initial backup finished");
        }
        Ok(())
    }

    /// Cancel the in-flight cycle, disarm the trigger and return to Idle.
    ///
    /// Completes only after every copy of the in-flight cycle has settled.
    pub async fn stop(&self) -> Result<(), ControlError> {
        let run = {
            let mut inner = self.inner.lock();
            if inner.state != SchedulerState::Running {
                return Err(ControlError::NotRunning);
            }
            info!("Scheduler Running -> Stopping");
            inner.state = SchedulerState::Stopping;
            inner.run.take()
        };

        // Finish on a separate task so a caller that gives up waiting
        // cannot leave the scheduler stuck in Stopping.
        let scheduler = self.clone();
        let finish = tokio::spawn(async move {
            if let Some(run) = run {
                run.cancel.cancel();
                if let Err(e) = run.driver.await {
                    error!("Scheduler task ended abnormally: {}", e);
                }
            }
            {
                let mut inner = scheduler.inner.lock();
                inner.state = SchedulerState::Idle;
                inner.settings = None;
            }
            info!("Scheduler Stopping -> Idle");
            scheduler
                .log_buffer
                .add_log("info", "Backup process stopped".to_string(), None);
            scheduler.notify_lifecycle(Event::BackupStopped);
        });

        if let Err(e) = finish.await {
            error!("Failed to finish stopping the scheduler: {}", e);
        }
        Ok(())
    }

    fn notify_lifecycle(&self, event: Event) {
        self.lifecycle
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
        let _ = self.event_tx.send(event);
    }

    async fn drive(
        self,
        settings: Arc<BackupSettings>,
        cancel: CancellationToken,
        ready: oneshot::Sender<()>,
    ) {
        self.run_cycle(&settings, &cancel).await;
        let _ = ready.send(());

        if cancel.is_cancelled() {
            return;
        }

        let period = settings.period(self.interval_unit);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Next backup in {}", humantime::format_duration(period));

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.run_cycle(&settings, &cancel).await,
            }
        }
    }

    async fn run_cycle(&self, settings: &BackupSettings, cancel: &CancellationToken) {
        let cycle = BackupCycle::new(Arc::clone(&self.copier), self.capacity)
            .with_log_buffer(self.log_buffer.clone());
        let cycle_id = cycle.id();
        let _ = self.event_tx.send(Event::CycleStarted { cycle_id });

        match cycle.run(self.files.as_ref(), settings, &cancel.child_token()).await {
            Ok(outcome) => {
                let summary = outcome.summary();
                {
                    let mut inner = self.inner.lock();
                    inner.cycles_completed += 1;
                    inner.last_cycle = Some(summary);
                }
                let _ = self.event_tx.send(Event::CycleCompleted(summary));
            }
            Err(e) => {
                // Fatal for this cycle only; the trigger stays armed.
                error!("Backup cycle {} failed: {}", cycle_id, e);
                let _ = self.event_tx.send(Event::CycleFailed {
                    cycle_id,
                    message: e.to_string(),
                });
            }
        }
    }
}
