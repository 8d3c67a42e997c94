//! JSON-backed collaborators: the tracked file list and the saved backup
//! settings, in the formats written by earlier versions of the application.

use crate::backup::{BackupSettings, TrackedFileListProvider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// `selected_files.json`: a JSON array of path strings.
#[derive(Debug, Clone)]
pub struct JsonFileList {
    path: PathBuf,
}

impl JsonFileList {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file means nothing has been selected yet.
    pub async fn load(&self) -> Result<Vec<PathBuf>> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("No files selected for backup ({} not found)", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };

        let names: Option<Vec<String>> = serde_json::from_str(&json)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        let files: Vec<PathBuf> = names.unwrap_or_default().into_iter().map(PathBuf::from).collect();
        debug!("Loaded {} tracked files from {}", files.len(), self.path.display());
        Ok(files)
    }

    pub async fn save(&self, files: &[PathBuf]) -> Result<()> {
        let names: Vec<String> = files.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        let json = serde_json::to_string(&names)?;
        write_atomic(&self.path, json.as_bytes()).await?;
        info!("Saved {} tracked files to {}", files.len(), self.path.display());
        Ok(())
    }

    /// Append files to the saved list, skipping ones already present.
    /// Returns how many were added.
    pub async fn add(&self, files: &[PathBuf]) -> Result<usize> {
        let mut current = self.load().await?;
        let before = current.len();
        for file in files {
            if !current.contains(file) {
                current.push(file.clone());
            }
        }
        let added = current.len() - before;
        if added > 0 {
            self.save(&current).await?;
        }
        Ok(added)
    }
}

#[async_trait]
impl TrackedFileListProvider for JsonFileList {
    async fn tracked_files(&self) -> Result<Vec<PathBuf>> {
        self.load().await
    }
}

/// In-memory tracked list; edits apply from the next cycle on.
#[derive(Debug, Default)]
pub struct MemoryFileList {
    files: RwLock<Vec<PathBuf>>,
}

impl MemoryFileList {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files: RwLock::new(files),
        }
    }

    pub fn replace(&self, files: Vec<PathBuf>) {
        *self.files.write() = files;
    }

    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.files.read().clone()
    }
}

#[async_trait]
impl TrackedFileListProvider for MemoryFileList {
    async fn tracked_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.snapshot())
    }
}

/// `backup_settings.json` with `SourcePath`, `DestinationPath` and `IntervalMinutes`.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `None` when no settings have been saved yet. Loaded values are not
    /// validated here; `BackupManager::initialize` does that.
    pub async fn load(&self) -> Result<Option<BackupSettings>> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", self.path.display())),
        };
        let settings = serde_json::from_str(&json)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(settings))
    }

    pub async fn save(&self, settings: &BackupSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        write_atomic(&self.path, json.as_bytes()).await?;
        info!("Backup settings saved to {}", self.path.display());
        Ok(())
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp = path.with_extension("json.tmp");
    tokio::fs::write(&temp, contents)
        .await
        .with_context(|| format!("writing {}", temp.display()))?;
    tokio::fs::rename(&temp, path)
        .await
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_list_is_empty() {
        let dir = TempDir::new().unwrap();
        let list = JsonFileList::new(dir.path().join("selected_files.json"));
        assert!(list.tracked_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_list_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("selected_files.json");
        std::fs::write(&path, b"{ not a list").unwrap();

        let list = JsonFileList::new(&path);
        assert!(list.tracked_files().await.is_err());
    }

    #[tokio::test]
    async fn test_reads_legacy_list() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("selected_files.json");
        std::fs::write(&path, br#"["a.txt","docs/b.txt"]"#).unwrap();

        let files = JsonFileList::new(&path).tracked_files().await.unwrap();
        assert_eq!(files, vec![PathBuf::from("a.txt"), PathBuf::from("docs/b.txt")]);
    }

    #[tokio::test]
    async fn test_null_list_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("selected_files.json");
        std::fs::write(&path, b"null").unwrap();
        assert!(JsonFileList::new(&path).load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_skips_duplicates() {
        let dir = TempDir::new().unwrap();
        let list = JsonFileList::new(dir.path().join("state").join("selected_files.json"));

        let added = list
            .add(&[PathBuf::from("a.txt"), PathBuf::from("b.txt")])
            .await
            .unwrap();
        assert_eq!(added, 2);

        let added = list
            .add(&[PathBuf::from("b.txt"), PathBuf::from("c.txt")])
            .await
            .unwrap();
        assert_eq!(added, 1);

        assert_eq!(
            list.load().await.unwrap(),
            vec![PathBuf::from("a.txt"), PathBuf::from("b.txt"), PathBuf::from("c.txt")]
        );
    }

    #[tokio::test]
    async fn test_memory_list_snapshot() {
        let list = MemoryFileList::new(vec![PathBuf::from("a.txt")]);
        let before = list.tracked_files().await.unwrap();
        list.replace(vec![PathBuf::from("b.txt")]);

        assert_eq!(before, vec![PathBuf::from("a.txt")]);
        assert_eq!(list.tracked_files().await.unwrap(), vec![PathBuf::from("b.txt")]);
    }

    #[tokio::test]
    async fn test_settings_round_trip_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("backup_settings.json"));
        assert_eq!(store.load().await.unwrap(), None);

        let settings = BackupSettings::new("/home/me", "/mnt/backup", 10);
        store.save(&settings).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("backup_settings.json")).unwrap();
        assert!(raw.contains("\"IntervalMinutes\":10"));
        assert_eq!(store.load().await.unwrap(), Some(settings));
    }
}
