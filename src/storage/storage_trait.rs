//! Repository Trait
//!
//! This module defines the `Repository` trait, the interface of the single
//! logical directory the server exposes to ADMIN sessions.
//!
//! Implementors are responsible for:
//! - Validating every name with [`validate_name`](super::types::validate_name)
//!   before touching storage
//! - Operating on raw bytes; wire encoding is the dispatcher's job
//! - Making writes atomic with respect to concurrent readers
//!
//! All methods are blocking and return a `Result` to handle repository errors.
//! Async callers run them on the blocking thread pool.

use crate::error_handling::types::RepositoryError;
use crate::storage::types::FileInfo;

pub trait Repository: Send + Sync {
    /// Names of all entries, sorted.
    fn list(&self) -> Result<Vec<String>, RepositoryError>;

    /// Full content of `name`.
    fn read(&self, name: &str) -> Result<Vec<u8>, RepositoryError>;

    /// Creates or replaces `name` with `data`. Readers see either the old or
    /// the new content, never a mix.
    fn write(&self, name: &str, data: &[u8]) -> Result<(), RepositoryError>;

    fn delete(&self, name: &str) -> Result<(), RepositoryError>;

    /// Names containing `needle`, compared case-insensitively. An empty
    /// result is not an error.
    fn search(&self, needle: &str) -> Result<Vec<String>, RepositoryError>;

    fn stat(&self, name: &str) -> Result<FileInfo, RepositoryError>;
}
