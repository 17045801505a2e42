//! Bounded, most-recent-first log of finished runs.
//!
//! The log survives restarts as a JSON array in a locked file. Eviction is
//! pure FIFO: entries are never touched again after they are appended.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::locked_file::LockedFile;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Handle shared between the coordinator and readers.
pub type SharedHistory = Arc<Mutex<HistoryRecorder>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub sql: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_read: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_read: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl HistoryEntry {
    /// Entry stamped now, with a fresh id and no statistics.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sql: sql.into(),
            timestamp: Utc::now(),
            duration_ms: None,
            rows_returned: None,
            rows_read: None,
            bytes_read: None,
            memory_usage: None,
            error: None,
            user: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

pub struct HistoryRecorder {
    entries: VecDeque<HistoryEntry>, // newest first
    capacity: usize,
    file: Option<LockedFile>,
}

impl HistoryRecorder {
    /// Volatile log, nothing written to disk.
    pub fn in_memory(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity), capacity, file: None }
    }

    /// Open (or create) the durable log at `path`.
    ///
    /// A corrupt log is logged and replaced, not treated as fatal: losing
    /// history must never keep the console from starting.
    pub fn open(path: &Path, capacity: usize) -> Result<Self> {
        let (file, text) = LockedFile::open_exclusive(path)?;
        let mut entries: VecDeque<HistoryEntry> = if text.trim().is_empty() {
            VecDeque::new()
        } else {
            serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "discarding unreadable history log");
                VecDeque::new()
            })
        };
        entries.truncate(capacity);
        Ok(Self { entries, capacity, file: Some(file) })
    }

    pub fn shared(self) -> SharedHistory {
        Arc::new(Mutex::new(self))
    }

    /// Insert as newest; the oldest entry drops off once over capacity.
    pub fn append(&mut self, entry: HistoryEntry) -> Result<()> {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
        self.persist()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.persist()
    }

    /// Newest first.
    pub fn list(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn persist(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            let data = serde_json::to_string_pretty(&self.entries)?;
            file.save(&data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RimeError;
    use tempfile::tempdir;

    fn entry(sql: &str) -> HistoryEntry {
        HistoryEntry::new(sql)
    }

    #[test]
    fn fifo_cap_keeps_newest_first() {
        let mut history = HistoryRecorder::in_memory(3);
        for i in 0..4 {
            history.append(entry(&format!("SELECT {i}"))).unwrap();
        }
        let sqls: Vec<String> = history.list().into_iter().map(|e| e.sql).collect();
        assert_eq!(sqls, vec!["SELECT 3", "SELECT 2", "SELECT 1"]);
        assert_eq!(history.len(), history.capacity());
    }

    #[test]
    fn default_capacity_evicts_single_oldest() {
        let mut history = HistoryRecorder::in_memory(DEFAULT_HISTORY_CAPACITY);
        for i in 0..=DEFAULT_HISTORY_CAPACITY {
            history.append(entry(&format!("q{i}"))).unwrap();
        }
        let list = history.list();
        assert_eq!(list.len(), DEFAULT_HISTORY_CAPACITY);
        assert_eq!(list.first().unwrap().sql, format!("q{DEFAULT_HISTORY_CAPACITY}"));
        assert_eq!(list.last().unwrap().sql, "q1");
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");

        let mut history = HistoryRecorder::open(&path, 10).unwrap();
        let mut failed = entry("SELECT boom");
        failed.error = Some("Code: 47. Unknown identifier".into());
        history.append(entry("SELECT 1")).unwrap();
        history.append(failed.clone()).unwrap();
        drop(history);

        let reopened = HistoryRecorder::open(&path, 10).unwrap();
        let list = reopened.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], failed);
        assert!(list[0].is_failure());
        assert_eq!(list[1].sql, "SELECT 1");
    }

    #[test]
    fn reopen_with_smaller_capacity_truncates_oldest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut history = HistoryRecorder::open(&path, 10).unwrap();
        for i in 0..5 {
            history.append(entry(&format!("SELECT {i}"))).unwrap();
        }
        drop(history);

        let reopened = HistoryRecorder::open(&path, 2).unwrap();
        let sqls: Vec<String> = reopened.list().into_iter().map(|e| e.sql).collect();
        assert_eq!(sqls, vec!["SELECT 4", "SELECT 3"]);
    }

    #[test]
    fn clear_empties_the_log_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut history = HistoryRecorder::open(&path, 10).unwrap();
        history.append(entry("SELECT 1")).unwrap();
        history.clear().unwrap();
        assert!(history.is_empty());
        drop(history);

        assert!(HistoryRecorder::open(&path, 10).unwrap().is_empty());
    }

    #[test]
    fn corrupt_log_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{ not json").unwrap();
        let history = HistoryRecorder::open(&path, 10).unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn second_open_is_rejected_while_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let _held = HistoryRecorder::open(&path, 10).unwrap();
        match HistoryRecorder::open(&path, 10) {
            Err(RimeError::HistoryLocked { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("second open should fail"),
        }
    }
}
