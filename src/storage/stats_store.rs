use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::statistics::StatsSnapshot;

/// Receives the periodic statistics snapshot.
pub trait StatsSink: Send + Sync {
    fn persist(&self, snapshot: &StatsSnapshot) -> Result<(), StorageError>;
}

/// Renders each snapshot into the process log.
pub struct LogStatsSink;

impl StatsSink for LogStatsSink {
    fn persist(&self, snapshot: &StatsSnapshot) -> Result<(), StorageError> {
        for line in snapshot.render().lines() {
            info!("{}", line);
        }
        Ok(())
    }
}

/// Keeps the latest snapshot as pretty-printed JSON in one file, replaced
/// atomically on every report.
pub struct JsonStatsFile {
    path: PathBuf,
}

impl JsonStatsFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatsSink for JsonStatsFile {
    fn persist(&self, snapshot: &StatsSnapshot) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("stats"));
        let temp = self
            .path
            .with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        fs::write(&temp, &json)
            .and_then(|_| fs::rename(&temp, &self.path))
            .map_err(|e| {
                error!("Failed to write stats file {}: {}", self.path.display(), e);
                if let Err(cleanup) = fs::remove_file(&temp) {
                    debug!("No temp file to remove at {}: {}", temp.display(), cleanup);
                }
                StorageError::WriteFailed(e.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::{ClientStats, StatsSnapshot};
    use chrono::Utc;
    use tempfile::TempDir;

    fn snapshot(total_bytes_in: u64) -> StatsSnapshot {
        StatsSnapshot {
            taken_at: Utc::now(),
            active_count: 1,
            queued_count: 0,
            per_client: vec![ClientStats {
                id: "127.0.0.1:4001".into(),
                bytes_in: total_bytes_in,
                ..ClientStats::default()
            }],
            total_bytes_in,
            total_bytes_out: 0,
            total_messages: 0,
            total_sessions: 1,
        }
    }

    #[test]
    fn test_json_file_holds_latest_snapshot() {
        let dir = TempDir::new().unwrap();
        let sink = JsonStatsFile::new(dir.path().join("stats.json"));

        sink.persist(&snapshot(10)).unwrap();
        sink.persist(&snapshot(25)).unwrap();

        let content = fs::read_to_string(sink.path()).unwrap();
        let parsed: StatsSnapshot = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.total_bytes_in, 25);
        assert_eq!(parsed.per_client[0].id, "127.0.0.1:4001");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_json_file_reports_missing_directory() {
        let dir = TempDir::new().unwrap();
        let sink = JsonStatsFile::new(dir.path().join("missing").join("stats.json"));
        assert!(matches!(
            sink.persist(&snapshot(1)),
            Err(StorageError::WriteFailed(_))
        ));
    }

    #[test]
    fn test_log_sink_never_fails() {
        assert!(LogStatsSink.persist(&snapshot(1)).is_ok());
    }
}
