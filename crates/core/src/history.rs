use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One executed run. There is deliberately no DSN field: entries are
/// attributed by adapter and database name only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub timestamp_unix_ms: u128,
    pub query: String,
    pub adapter: String,
    pub database: String,
    pub duration_ms: u128,
    /// `-1` for streamed results, whose total is never computed.
    pub row_count: i64,
    pub error: bool,
}

#[must_use]
pub fn unix_timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("invalid history path `{0}`")]
    InvalidPath(PathBuf),
    #[error("failed to create history directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize history entry: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append history entry at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub trait HistorySink: Send + Sync {
    fn record(&self, entry: &HistoryEntry) -> Result<(), HistoryError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHistory;

impl HistorySink for NoopHistory {
    fn record(&self, _entry: &HistoryEntry) -> Result<(), HistoryError> {
        Ok(())
    }
}

/// Appends entries as JSON lines.
#[derive(Debug)]
pub struct FileHistory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileHistory {
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistorySink for FileHistory {
    fn record(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let parent_dir = self
            .path
            .parent()
            .ok_or_else(|| HistoryError::InvalidPath(self.path.clone()))?;
        fs::create_dir_all(parent_dir).map_err(|source| HistoryError::CreateDir {
            path: parent_dir.to_path_buf(),
            source,
        })?;

        let rendered =
            serde_json::to_string(entry).map_err(|source| HistoryError::Serialize { source })?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| HistoryError::Write {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{rendered}").map_err(|source| HistoryError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{unix_timestamp_millis, FileHistory, HistoryEntry, HistorySink};

    fn entry(query: &str, row_count: i64, error: bool) -> HistoryEntry {
        HistoryEntry {
            timestamp_unix_ms: 1,
            query: query.to_string(),
            adapter: "mysql".to_string(),
            database: "app".to_string(),
            duration_ms: 5,
            row_count,
            error,
        }
    }

    #[test]
    fn appends_json_lines_to_file() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("nested").join("history.ndjson");
        let history = FileHistory::from_path(&path);

        let streamed = entry("SELECT * FROM users", -1, false);
        let failed = entry("DELETE FROM nope", 0, true);
        history.record(&streamed).expect("failed to append first entry");
        history.record(&failed).expect("failed to append second entry");

        let content = std::fs::read_to_string(path).expect("failed to read history file");
        let loaded: Vec<HistoryEntry> = content
            .lines()
            .map(|line| serde_json::from_str(line).expect("failed to parse line"))
            .collect();

        assert_eq!(loaded, vec![streamed, failed]);
    }

    #[test]
    fn serialized_entry_has_no_connection_string_field() {
        let rendered =
            serde_json::to_string(&entry("SELECT 1", 1, false)).expect("serialize entry");
        assert!(!rendered.contains("dsn"));
        assert!(rendered.contains("\"adapter\":\"mysql\""));
    }

    #[test]
    fn timestamp_uses_unix_epoch_millis() {
        assert!(unix_timestamp_millis() > 0);
    }
}
