use std::sync::{Arc, Mutex};
use std::collections::VecDeque;
use serde::Serialize;
use chrono::Utc;

/// One structured log event kept for the presentation layer
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub level: String,
    pub message: String,
    /// Tracked file the entry refers to, if any
    pub path: Option<String>,
}

/// Bounded in-memory log; the oldest entries are dropped first.
#[derive(Clone)]
pub struct LogBuffer {
    buffer: Arc<Mutex<VecDeque<LogEntry>>>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(max_entries))),
            max_entries,
        }
    }

    pub fn add_log(&self, level: &str, message: String, path: Option<String>) {
        let entry = LogEntry {
            timestamp: Utc::now().timestamp(),
            level: level.to_string(),
            message,
            path,
        };

        if let Ok(mut buffer) = self.buffer.lock() {
            if buffer.len() >= self.max_entries {
                buffer.pop_front();
            }
            buffer.push_back(entry);
        }
    }

    /// Most recent `limit` entries, oldest first
    pub fn get_logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        if let Ok(buffer) = self.buffer.lock() {
            let skip = limit.map_or(0, |n| buffer.len().saturating_sub(n));
            buffer.iter().skip(skip).cloned().collect()
        } else {
            Vec::new()
        }
    }

    pub fn clear(&self) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
    }
}
