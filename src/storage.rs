//! Storage subsystem
//!
//! This module provides the file repository exposed to ADMIN sessions and the
//! collaborators that persist operator-facing records.
//!
//! Components:
//! - `storage_trait`: the `Repository` trait defining the file operations.
//! - `types`: shared data types and filename validation.
//! - `file_storage`: filesystem-backed repository rooted at one directory.
//! - `stats_store`: sinks receiving periodic statistics snapshots.
//! - `activity_log`: sinks receiving `(timestamp, client, event)` records.

pub mod activity_log;
pub mod file_storage;
pub mod stats_store;
pub mod storage_trait;
pub mod types;

pub use activity_log::{ActivityLog, FileActivityLog, LogActivity};
pub use file_storage::FileRepository;
pub use stats_store::{JsonStatsFile, LogStatsSink, StatsSink};
pub use storage_trait::Repository;
pub use types::{validate_name, FileInfo};
