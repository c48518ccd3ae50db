use crate::error_handling::types::RepositoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// Checks that `name` is a plain file name inside the repository root.
///
/// Names are rejected, never rewritten: empty names, path separators, NUL
/// bytes and any name starting with `.` (which covers `.`, `..` and the
/// repository's own temporary files) are all [`RepositoryError::InvalidName`].
pub fn validate_name(name: &str) -> Result<&str, RepositoryError> {
    let invalid = || RepositoryError::InvalidName(name.to_string());

    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name.chars().any(char::is_control)
    {
        return Err(invalid());
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(name),
        _ => Err(invalid()),
    }
}
