use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::backup::DEFAULT_CONCURRENCY;

/// Process-level configuration. Backup settings themselves are not part of
/// it; they are loaded from the state directory and passed to `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding selected_files.json and backup_settings.json
    pub state_dir: PathBuf,

    /// Maximum number of files copied at the same time within one cycle
    pub max_concurrent_copies: usize,

    /// Re-read every copy and compare digests before publishing it
    pub verify_copies: bool,

    /// Optional plain-text log file, in addition to stdout
    pub log_file: Option<PathBuf>,

    /// Emit stdout logs as JSON
    pub log_json: bool,

    /// Entries kept in the in-memory log buffer
    pub log_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        let state_dir = dirs::data_dir()
            .map(|d| d.join("autosave"))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            state_dir,
            max_concurrent_copies: DEFAULT_CONCURRENCY,
            verify_copies: false,
            log_file: None,
            log_json: false,
            log_buffer_size: 1000,
        }
    }
}

impl Config {
    /// Load config from `autosave.toml` (optional) and `AUTOSAVE_*` environment variables
    pub fn load() -> Result<Self> {
        Self::load_with_prefix("AUTOSAVE")
    }

    fn load_with_prefix(prefix: &str) -> Result<Self> {
        let config: Config = ::config::Config::builder()
            .add_source(::config::File::with_name("autosave").required(false))
            .add_source(::config::Environment::with_prefix(prefix).try_parsing(true))
            .build()?
            .try_deserialize()?;

        if config.max_concurrent_copies == 0 {
            bail!("max_concurrent_copies must be at least 1");
        }

        Ok(config)
    }

    pub fn selected_files_path(&self) -> PathBuf {
        self.state_dir.join("selected_files.json")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.state_dir.join("backup_settings.json")
    }
}

pub fn load_config() -> Result<Config> {
    Config::load()
}
