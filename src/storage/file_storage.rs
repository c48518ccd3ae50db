use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use uuid::Uuid;

use crate::error_handling::types::RepositoryError;
use crate::storage::storage_trait::Repository;
use crate::storage::types::{validate_name, FileInfo};

/// Repository backed by one directory on the local filesystem.
///
/// Writes go to a hidden temporary file in the same directory which is then
/// renamed over the target, so a reader never observes a partial file.
pub struct FileRepository {
    root: PathBuf,
}

impl FileRepository {
    /// Opens the repository at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, RepositoryError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            error!("Failed to create repository dir {}: {}", root.display(), e);
            RepositoryError::IoError(e)
        })?;
        info!("FileRepository initialized at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf, RepositoryError> {
        Ok(self.root.join(validate_name(name)?))
    }

    /// Path of an existing regular file, `NotFound` for anything else.
    /// Symlinks are not followed.
    fn existing_file(&self, name: &str) -> Result<(PathBuf, fs::Metadata), RepositoryError> {
        let path = self.entry_path(name)?;
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_file() => Ok((path, meta)),
            Ok(_) => Err(RepositoryError::NotFound(name.to_string())),
            Err(e) => Err(io_failure(name, &path, e)),
        }
    }

    /// Independent of the target name, which may already be at the
    /// filesystem's length limit. The leading dot keeps it out of listings.
    fn temp_path(&self) -> PathBuf {
        self.root.join(format!(".{}.tmp", Uuid::new_v4().simple()))
    }
}

fn io_failure(name: &str, path: &Path, e: std::io::Error) -> RepositoryError {
    if e.kind() == ErrorKind::NotFound {
        RepositoryError::NotFound(name.to_string())
    } else {
        error!("IO failure on {}: {}", path.display(), e);
        RepositoryError::IoError(e)
    }
}

fn to_utc(time: std::io::Result<std::time::SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

impl Repository for FileRepository {
    fn list(&self) -> Result<Vec<String>, RepositoryError> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            error!("Failed to read repository dir {}: {}", self.root.display(), e);
            RepositoryError::IoError(e)
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                error!("Dir entry error: {}", e);
                RepositoryError::IoError(e)
            })?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            // Temp files and anything else a client could not address stay hidden
            if is_file && validate_name(&name).is_ok() {
                names.push(name);
            }
        }
        names.sort();
        debug!("Listed {} file(s) in {}", names.len(), self.root.display());
        Ok(names)
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, RepositoryError> {
        let (path, _) = self.existing_file(name)?;
        let data = fs::read(&path).map_err(|e| io_failure(name, &path, e))?;
        debug!("Read {} byte(s) from {}", data.len(), path.display());
        Ok(data)
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<(), RepositoryError> {
        let path = self.entry_path(name)?;
        let temp = self.temp_path();

        let result = File::create(&temp)
            .and_then(|mut f| {
                f.write_all(data)?;
                f.sync_all()
            })
            .and_then(|_| fs::rename(&temp, &path));

        if let Err(e) = result {
            error!("Write failed {}: {}", path.display(), e);
            if let Err(cleanup) = fs::remove_file(&temp) {
                debug!("No temp file to remove at {}: {}", temp.display(), cleanup);
            }
            return Err(RepositoryError::IoError(e));
        }
        info!("Wrote {} byte(s) to {}", data.len(), path.display());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), RepositoryError> {
        let (path, _) = self.existing_file(name)?;
        fs::remove_file(&path).map_err(|e| io_failure(name, &path, e))?;
        info!("Deleted {}", path.display());
        Ok(())
    }

    fn search(&self, needle: &str) -> Result<Vec<String>, RepositoryError> {
        let needle = needle.to_lowercase();
        let mut names = self.list()?;
        names.retain(|name| name.to_lowercase().contains(&needle));
        Ok(names)
    }

    fn stat(&self, name: &str) -> Result<FileInfo, RepositoryError> {
        let (_, meta) = self.existing_file(name)?;
        let modified = to_utc(meta.modified()).unwrap_or_else(Utc::now);
        // Not every filesystem records a birth time
        let created = to_utc(meta.created()).unwrap_or(modified);
        Ok(FileInfo {
            name: name.to_string(),
            size: meta.len(),
            created,
            modified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn repository() -> (TempDir, FileRepository) {
        let dir = TempDir::new().unwrap();
        let repository = FileRepository::new(dir.path().join("server_files")).unwrap();
        (dir, repository)
    }

    #[test]
    fn test_write_then_read_binary() {
        let (_dir, repository) = repository();
        let payload: Vec<u8> = (0..=255u8).collect();
        repository.write("blob.bin", &payload).unwrap();
        assert_eq!(repository.read("blob.bin").unwrap(), payload);
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let (_dir, repository) = repository();
        repository.write("a.txt", b"first version").unwrap();
        repository.write("a.txt", b"v2").unwrap();
        assert_eq!(repository.read("a.txt").unwrap(), b"v2");
    }

    #[test]
    fn test_list_is_sorted_and_hides_temp_files() {
        let (_dir, repository) = repository();
        repository.write("b.txt", b"b").unwrap();
        repository.write("a.txt", b"a").unwrap();
        fs::write(repository.root().join(".deadbeef.tmp"), b"partial").unwrap();
        fs::create_dir(repository.root().join("subdir")).unwrap();

        assert_eq!(repository.list().unwrap(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_name_at_length_limit_can_be_uploaded() {
        let (_dir, repository) = repository();
        let name = format!("{}.bin", "n".repeat(251));
        assert_eq!(name.len(), 255);

        repository.write(&name, b"long name").unwrap();
        assert_eq!(repository.read(&name).unwrap(), b"long name");
        assert_eq!(repository.list().unwrap(), vec![name]);
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let (_dir, repository) = repository();
        repository.write("a.txt", b"a").unwrap();
        let entries: Vec<_> = fs::read_dir(repository.root()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_delete_missing_is_not_found_and_changes_nothing() {
        let (_dir, repository) = repository();
        repository.write("keep.txt", b"keep").unwrap();

        let err = repository.delete("ghost.txt").unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
        assert_eq!(repository.list().unwrap(), vec!["keep.txt"]);
    }

    #[test]
    fn test_delete_removes_only_target() {
        let (_dir, repository) = repository();
        repository.write("a.txt", b"a").unwrap();
        repository.write("b.txt", b"b").unwrap();

        repository.delete("a.txt").unwrap();
        assert_eq!(repository.list().unwrap(), vec!["b.txt"]);
    }

    #[test]
    fn test_traversal_rejected_before_io() {
        let (dir, repository) = repository();
        fs::write(dir.path().join("outside.txt"), b"secret").unwrap();

        for op in [
            repository.read("../outside.txt").map(|_| ()),
            repository.write("../outside.txt", b"pwned"),
            repository.delete("../outside.txt"),
            repository.stat("../outside.txt").map(|_| ()),
        ] {
            assert!(matches!(op, Err(RepositoryError::InvalidName(_))));
        }
        assert_eq!(fs::read(dir.path().join("outside.txt")).unwrap(), b"secret");
    }

    #[test]
    fn test_read_missing_and_directory_are_not_found() {
        let (_dir, repository) = repository();
        fs::create_dir(repository.root().join("subdir")).unwrap();

        assert!(matches!(
            repository.read("missing.txt"),
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            repository.read("subdir"),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_search_is_case_insensitive_substring() {
        let (_dir, repository) = repository();
        repository.write("Report-2024.txt", b"").unwrap();
        repository.write("notes.md", b"").unwrap();
        repository.write("old_report.txt", b"").unwrap();

        assert_eq!(
            repository.search("report").unwrap(),
            vec!["Report-2024.txt", "old_report.txt"]
        );
        assert!(repository.search("zzz").unwrap().is_empty());
    }

    #[test]
    fn test_stat_reports_size_and_times() {
        let (_dir, repository) = repository();
        repository.write("a.txt", b"hello").unwrap();

        let info = repository.stat("a.txt").unwrap();
        assert_eq!(info.name, "a.txt");
        assert_eq!(info.size, 5);
        assert!(info.created <= Utc::now());
        assert!(info.modified <= Utc::now());
    }

    #[test]
    fn test_concurrent_writers_never_interleave() {
        let (_dir, repository) = repository();
        let repository = Arc::new(repository);
        let a = vec![b'a'; 64 * 1024];
        let b = vec![b'b'; 64 * 1024];

        let handles: Vec<_> = [a.clone(), b.clone()]
            .into_iter()
            .map(|payload| {
                let repository = Arc::clone(&repository);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        repository.write("shared.bin", &payload).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let content = repository.read("shared.bin").unwrap();
        assert!(content == a || content == b);
    }
}
