use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{error, info};

use crate::error_handling::types::StorageError;
use crate::session_management::SessionId;

/// Receives `(timestamp, client, event)` records of session activity.
pub trait ActivityLog: Send + Sync {
    fn record(&self, at: DateTime<Utc>, client: &SessionId, event: &str)
        -> Result<(), StorageError>;
}

/// Emits activity through the `log` facade under the `activity` target.
pub struct LogActivity;

impl ActivityLog for LogActivity {
    fn record(
        &self,
        at: DateTime<Utc>,
        client: &SessionId,
        event: &str,
    ) -> Result<(), StorageError> {
        info!(target: "activity", "{} [{}] {}", at.to_rfc3339(), client, event);
        Ok(())
    }
}

/// Appends tab-separated activity lines to a file.
pub struct FileActivityLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileActivityLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                error!("Open append failed {}: {}", path.display(), e);
                StorageError::WriteFailed(e.to_string())
            })?;
        info!("Activity log at {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl ActivityLog for FileActivityLog {
    fn record(
        &self,
        at: DateTime<Utc>,
        client: &SessionId,
        event: &str,
    ) -> Result<(), StorageError> {
        // One line per record, embedded newlines would split it
        let event = event.replace(['\n', '\r'], " ");
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(file, "{}\t{}\t{}", at.to_rfc3339(), client, event).map_err(|e| {
            error!("Write failed {}: {}", self.path.display(), e);
            StorageError::WriteFailed(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tempfile::TempDir;

    #[test]
    fn test_file_log_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activity.log");
        let client = SessionId::from("192.168.1.7:51000".parse::<SocketAddr>().unwrap());

        let log = FileActivityLog::open(&path).unwrap();
        log.record(Utc::now(), &client, "connected").unwrap();
        log.record(Utc::now(), &client, "message: hi\nthere").unwrap();
        drop(log);

        let reopened = FileActivityLog::open(&path).unwrap();
        reopened.record(Utc::now(), &client, "closed").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("\t192.168.1.7:51000\tconnected"));
        assert!(lines[1].ends_with("message: hi there"));
        assert!(lines[2].ends_with("closed"));
    }
}
