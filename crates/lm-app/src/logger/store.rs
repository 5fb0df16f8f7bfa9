use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use super::entry::LogEntry;

const ENTRIES_FILE: &str = "request-log.json";

/// Persistence backend for the structured logger.
///
/// Failures are reported to the logger, which keeps working in memory.
pub trait LogStore: Send + Sync {
    fn load(&self) -> Result<Vec<LogEntry>>;
    fn save(&self, entries: &[LogEntry]) -> Result<()>;
    fn save_rotated(&self, name: &str, text: &str) -> Result<()>;
}

/// Keeps everything in process memory
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<LogEntry>>,
    rotated: Mutex<Vec<(String, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<LogEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            rotated: Mutex::new(Vec::new()),
        }
    }

    pub fn saved_entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn rotated_files(&self) -> Vec<(String, String)> {
        self.rotated.lock().clone()
    }
}

impl LogStore for MemoryStore {
    fn load(&self) -> Result<Vec<LogEntry>> {
        Ok(self.entries.lock().clone())
    }

    fn save(&self, entries: &[LogEntry]) -> Result<()> {
        *self.entries.lock() = entries.to_vec();
        Ok(())
    }

    fn save_rotated(&self, name: &str, text: &str) -> Result<()> {
        self.rotated.lock().push((name.to_string(), text.to_string()));
        Ok(())
    }
}

/// Mirrors the log to a JSON file and writes rotated text next to it.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn entries_path(&self) -> PathBuf {
        self.dir.join(ENTRIES_FILE)
    }
}

impl LogStore for JsonFileStore {
    fn load(&self) -> Result<Vec<LogEntry>> {
        let path = self.entries_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse log mirror {}", path.display()))
    }

    /// Write-to-temp-then-rename so a reader never sees half a file
    fn save(&self, entries: &[LogEntry]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.entries_path();
        let temp_path = path.with_extension("tmp");
        let json = serde_json::to_vec(entries).context("Failed to serialize log entries")?;

        let mut temp_file = File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        temp_file.write_all(&json)?;

        fs::rename(&temp_path, &path)
            .with_context(|| format!("Failed to move log mirror into {}", path.display()))?;
        Ok(())
    }

    fn save_rotated(&self, name: &str, text: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.dir.join(name);
        fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))
    }
}
