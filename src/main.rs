use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use autosave::backup::{BackupManager, Event};
use autosave::store::{JsonFileList, SettingsStore};
use autosave::utils;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let config = utils::config::load_config()?;
    utils::logging::init_tracing(&config)?;

    info!("Starting AutoSave v{}", env!("CARGO_PKG_VERSION"));
    info!("State directory: {}", config.state_dir.display());

    let settings = SettingsStore::new(config.settings_path())
        .load()
        .await?
        .with_context(|| {
            format!(
                "no backup settings found at {}",
                config.settings_path().display()
            )
        })?;

    let files = Arc::new(JsonFileList::new(config.selected_files_path()));
    let manager = BackupManager::new(&config, files);
    manager.initialize(settings)?;

    // Report lifecycle events until the manager goes away
    let mut events = manager.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Event::BackupStarted) => info!("Backup started"),
                Ok(Event::BackupStopped) => info!("Backup stopped"),
                Ok(Event::CycleCompleted(summary)) if summary.failed > 0 => warn!(
                    "Backup finished with {} of {} files failing",
                    summary.failed, summary.attempted
                ),
                Ok(Event::CycleFailed { message, .. }) => error!("Backup failed: {}", message),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} backup events", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // A signal during the initial pass cancels it rather than waiting it out
    manager.run_until(shutdown_signal()).await?;
    info!("AutoSave stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
