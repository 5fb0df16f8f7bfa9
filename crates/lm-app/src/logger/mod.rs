//! Structured request/response log kept alongside the dashboard.
//!
//! Every entry is redacted, appended to a bounded in-memory sequence,
//! mirrored to a [`LogStore`], appended to a size-rotated text buffer and
//! echoed to `tracing`. Logging never fails the caller.
//!
//! Store writes happen outside the entry lock. Inside a tokio runtime they
//! run on the blocking pool and bursts collapse into one write of the
//! latest snapshot.

mod entry;
mod sanitize;
mod store;
mod text_buffer;

pub use entry::{FileDescriptor, LogEntry, LogLevel, LogType};
pub use sanitize::{REDACTED, is_sensitive_key, sanitize, sanitize_payload};
pub use store::{JsonFileStore, LogStore, MemoryStore};
pub use text_buffer::{RotatedText, TextBuffer};

use std::collections::VecDeque;
use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};
use uuid::Uuid;

const FILE_METHOD: &str = "FILE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerSettings {
    /// Most recent entries kept in memory
    pub capacity: usize,
    /// Text buffer size that triggers a rotation
    pub rotate_bytes: usize,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            capacity: 5000,
            rotate_bytes: 1024 * 1024,
        }
    }
}

struct LoggerState {
    entries: VecDeque<LogEntry>,
    text: TextBuffer,
}

/// Persistence side of the logger
struct Mirror {
    store: Arc<dyn LogStore>,
    /// Set when the store is behind the in-memory sequence
    dirty: AtomicBool,
    writing: Mutex<()>,
}

impl Mirror {
    fn flush(&self, state: &Mutex<LoggerState>) {
        let _writing = self.writing.lock();
        self.dirty.store(false, Ordering::SeqCst);

        let snapshot: Vec<LogEntry> = state.lock().entries.iter().cloned().collect();
        if let Err(e) = self.store.save(&snapshot) {
            warn!("Request log kept in memory only: {e:#}");
        }
    }
}

pub struct StructuredLogger {
    settings: LoggerSettings,
    state: Arc<Mutex<LoggerState>>,
    mirror: Arc<Mirror>,
}

impl StructuredLogger {
    /// Hydrates from the store. Missing or corrupted data starts empty.
    pub fn new(settings: LoggerSettings, store: Arc<dyn LogStore>) -> Self {
        let capacity = settings.capacity.max(1);
        let mut entries: VecDeque<LogEntry> = match store.load() {
            Ok(entries) => entries.into(),
            Err(e) => {
                warn!("Discarding persisted request log: {e:#}");
                VecDeque::new()
            }
        };
        while entries.len() > capacity {
            entries.pop_front();
        }

        Self {
            settings: LoggerSettings { capacity, ..settings },
            state: Arc::new(Mutex::new(LoggerState {
                entries,
                text: TextBuffer::new(settings.rotate_bytes),
            })),
            mirror: Arc::new(Mirror {
                store,
                dirty: AtomicBool::new(false),
                writing: Mutex::new(()),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(LoggerSettings::default(), Arc::new(MemoryStore::new()))
    }

    /// Records an outgoing request and returns its fresh correlation id.
    pub fn log_request<T: Serialize + Debug + ?Sized>(
        &self,
        endpoint: &str,
        method: &str,
        data: &T,
    ) -> String {
        self.log_request_with_id(None, endpoint, method, data)
    }

    /// Same as [`log_request`](Self::log_request) but reuses a caller id
    /// when one is supplied.
    pub fn log_request_with_id<T: Serialize + Debug + ?Sized>(
        &self,
        correlation_id: Option<&str>,
        endpoint: &str,
        method: &str,
        data: &T,
    ) -> String {
        let correlation_id = correlation_id
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(new_correlation_id);

        self.add_log(LogEntry {
            timestamp: Utc::now(),
            entry_type: LogType::Request,
            level: LogLevel::Info,
            correlation_id: correlation_id.clone(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            payload: sanitize_payload(data),
            status_code: None,
            duration_millis: None,
        });

        correlation_id
    }

    /// Records a response. Several responses may share one correlation id.
    pub fn log_response<T: Serialize + Debug + ?Sized>(
        &self,
        correlation_id: &str,
        endpoint: &str,
        data: &T,
        status_code: Option<u16>,
        duration_millis: Option<u64>,
    ) {
        let level = match status_code {
            Some(status) if status >= 400 => LogLevel::Warn,
            _ => LogLevel::Info,
        };

        self.add_log(LogEntry {
            timestamp: Utc::now(),
            entry_type: LogType::Response,
            level,
            correlation_id: correlation_id.to_string(),
            endpoint: endpoint.to_string(),
            method: String::new(),
            payload: sanitize_payload(data),
            status_code,
            duration_millis,
        });
    }

    pub fn log_error(
        &self,
        correlation_id: &str,
        endpoint: &str,
        err: &dyn Display,
        context: Option<Value>,
    ) {
        self.log_error_timed(correlation_id, endpoint, err, context, None);
    }

    pub fn log_error_timed(
        &self,
        correlation_id: &str,
        endpoint: &str,
        err: &dyn Display,
        context: Option<Value>,
        duration_millis: Option<u64>,
    ) {
        let mut payload = json!({ "message": err.to_string() });
        if let Some(context) = context {
            payload["context"] = context;
        }

        self.add_log(LogEntry {
            timestamp: Utc::now(),
            entry_type: LogType::Error,
            level: LogLevel::Error,
            correlation_id: correlation_id.to_string(),
            endpoint: endpoint.to_string(),
            method: String::new(),
            payload: sanitize(payload),
            status_code: None,
            duration_millis,
        });
    }

    /// Records a file operation, returning the correlation id used.
    pub fn log_file_operation(
        &self,
        operation: &str,
        files: &[FileDescriptor],
        correlation_id: Option<&str>,
    ) -> String {
        self.file_entry(LogLevel::Info, operation, files, None, correlation_id)
    }

    /// A file operation that did not succeed but is not fatal on its own
    pub fn log_file_failure(
        &self,
        operation: &str,
        files: &[FileDescriptor],
        reason: &str,
        correlation_id: Option<&str>,
    ) -> String {
        self.file_entry(
            LogLevel::Warn,
            operation,
            files,
            Some(json!({ "reason": reason })),
            correlation_id,
        )
    }

    fn file_entry(
        &self,
        level: LogLevel,
        operation: &str,
        files: &[FileDescriptor],
        details: Option<Value>,
        correlation_id: Option<&str>,
    ) -> String {
        let correlation_id = correlation_id
            .map(str::to_string)
            .unwrap_or_else(new_correlation_id);

        let mut payload = json!({
            "count": files.len(),
            "files": sanitize_payload(files),
        });
        if let Some(details) = details {
            payload["details"] = sanitize(details);
        }

        self.add_log(LogEntry {
            timestamp: Utc::now(),
            entry_type: LogType::FileOperation,
            level,
            correlation_id: correlation_id.clone(),
            endpoint: operation.to_string(),
            method: FILE_METHOD.to_string(),
            payload,
            status_code: None,
            duration_millis: None,
        });

        correlation_id
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.state.lock().entries.iter().cloned().collect()
    }

    pub fn by_correlation_id(&self, correlation_id: &str) -> Vec<LogEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.entries.clear();
            state.text.clear();
        }
        self.schedule_persist();
    }

    /// Pretty JSON array of every retained entry
    pub fn to_json(&self) -> String {
        let entries = self.entries();
        serde_json::to_string_pretty(&entries).unwrap_or_else(|e| {
            json!({ "error": "unserializable", "original": e.to_string() }).to_string()
        })
    }

    /// One line per retained entry
    pub fn to_text(&self) -> String {
        self.state
            .lock()
            .entries
            .iter()
            .map(LogEntry::to_text_line)
            .collect()
    }

    /// Text accumulated since the last rotation
    pub fn pending_text(&self) -> String {
        self.state.lock().text.contents().to_string()
    }

    pub fn rotations(&self) -> u64 {
        self.state.lock().text.rotations()
    }

    /// Single mutation point; the lock serializes appends, eviction and
    /// text rotation. Store writes happen after it is released.
    fn add_log(&self, entry: LogEntry) {
        mirror_to_tracing(&entry);
        let line = entry.to_text_line();

        let rotated = {
            let mut state = self.state.lock();
            state.entries.push_back(entry);
            while state.entries.len() > self.settings.capacity {
                state.entries.pop_front();
            }
            state.text.push_line(&line)
        };

        self.schedule_persist();

        if let Some(rotated) = rotated {
            let name = format!(
                "request-log-{}-{:04}.txt",
                Utc::now().format("%Y%m%dT%H%M%S"),
                rotated.sequence
            );
            let store = self.mirror.store.clone();
            offload(move || match store.save_rotated(&name, &rotated.text) {
                Ok(()) => info!("Rotated request log text into {name}"),
                Err(e) => warn!("Dropped rotated request log text {name}: {e:#}"),
            });
        }
    }

    /// Queues one write of the latest entries unless one is already pending.
    fn schedule_persist(&self) {
        if self.mirror.dirty.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = self.state.clone();
        let mirror = self.mirror.clone();
        offload(move || mirror.flush(&state));
    }
}

/// Runs file I/O on the blocking pool when inside a runtime, inline otherwise.
fn offload(job: impl FnOnce() + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(job);
        }
        Err(_) => job(),
    }
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn mirror_to_tracing(entry: &LogEntry) {
    let kind = entry.entry_type.as_str();
    match entry.level {
        LogLevel::Info => info!(
            correlation_id = %entry.correlation_id,
            endpoint = %entry.endpoint,
            "{kind} {}", entry.method
        ),
        LogLevel::Warn => warn!(
            correlation_id = %entry.correlation_id,
            endpoint = %entry.endpoint,
            status = ?entry.status_code,
            "{kind} {}", entry.payload
        ),
        LogLevel::Error => error!(
            correlation_id = %entry.correlation_id,
            endpoint = %entry.endpoint,
            "{kind} {}", entry.payload
        ),
    }
}
