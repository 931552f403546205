use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::errors::Error;
use crate::image::{Extensions, ImageName};
use crate::retention_log::RetentionLog;

/// Outcome of a batch deletion.
#[derive(Debug, Default)]
pub struct DeletionReport {
    /// Files removed from disk.
    pub deleted: Vec<ImageName>,

    /// Per-file failures, in input order.
    pub errors: Vec<Error>,
}

impl DeletionReport {
    /// Success message, if anything was deleted.
    pub fn message(&self) -> Option<String> {
        match self.deleted.as_slice() {
            [] => None,
            [name] => Some(format!("Deleted {}.", name)),
            names => Some(format!("Deleted {} files.", names.len())),
        }
    }
}

/// Removes files from the storage directory on user request.
///
/// Log entries are purged whenever the file is known to be gone, and kept if unlinking fails,
/// so the deletion can be retried.
#[derive(Debug, Clone)]
pub struct DeletionExecutor<'a> {
    dir: &'a Path,
    extensions: &'a Extensions,
}

impl<'a> DeletionExecutor<'a> {
    pub fn new(dir: &'a Path, extensions: &'a Extensions) -> Self {
        Self { dir, extensions }
    }

    /// Delete a single file given by raw user input.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSelection`] if `raw_name` is not a bare image filename, no I/O happens;
    /// - [`Error::FileNotFound`] if the file is absent, its log entry is purged anyway;
    /// - [`Error::DeletionFailed`] if unlinking failed, its log entry is kept.
    pub async fn delete_one(
        &self,
        raw_name: &str,
        log: &mut RetentionLog,
    ) -> Result<ImageName, Error> {
        let name = ImageName::parse(raw_name, self.extensions)?;
        self.delete(&name, log).await?;
        Ok(name)
    }

    /// Delete every file in `raw_names`.
    ///
    /// Names are normalized and deduplicated first. Failures are reported per file and never
    /// stop the rest of the batch.
    pub async fn delete_many<I, S>(&self, raw_names: I, log: &mut RetentionLog) -> DeletionReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = DeletionReport::default();
        let mut seen = HashSet::new();
        let mut rejected = HashSet::new();
        let mut names = vec![];
        let mut selected = 0;
        for raw_name in raw_names {
            selected += 1;
            let raw_name = raw_name.as_ref();
            match ImageName::parse(raw_name, self.extensions) {
                Ok(name) => {
                    if seen.insert(name.clone()) {
                        names.push(name);
                    }
                }
                Err(err) => {
                    if rejected.insert(raw_name.trim().to_string()) {
                        report.errors.push(err);
                    }
                }
            }
        }

        if selected == 0 {
            report.errors.push(Error::NothingSelected);
            return report;
        }

        info!("deleting {} selected files", names.len());
        for name in names {
            match self.delete(&name, log).await {
                Ok(()) => report.deleted.push(name),
                Err(err) => report.errors.push(err),
            }
        }
        report
    }

    async fn delete(&self, name: &ImageName, log: &mut RetentionLog) -> Result<(), Error> {
        let path = self.dir.join(name);
        let is_file = match fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata.is_file(),
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => {
                warn!("failed to stat '{}': {}", path.display(), err);
                true
            }
        };
        if !is_file {
            return Err(self.not_found(name, log));
        }
        self.unlink(name, log).await
    }

    /// Remove the file and its log entry. The entry is kept if unlinking fails.
    async fn unlink(&self, name: &ImageName, log: &mut RetentionLog) -> Result<(), Error> {
        match fs::remove_file(self.dir.join(name)).await {
            Ok(()) => {
                log.remove(name.as_str());
                info!("deleted '{}'", name);
                Ok(())
            }
            // Another request deleted the file in between
            Err(err) if err.kind() == ErrorKind::NotFound => Err(self.not_found(name, log)),
            Err(source) => {
                error!("failed to delete '{}': {}", name, source);
                Err(Error::DeletionFailed {
                    name: name.clone(),
                    source,
                })
            }
        }
    }

    fn not_found(&self, name: &ImageName, log: &mut RetentionLog) -> Error {
        if log.remove(name.as_str()) {
            debug!("purged log entry of missing file '{}'", name);
        }
        warn!("file '{}' not found on disk", name);
        Error::FileNotFound(name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::fixtures::put_file;
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_790_000_000, 0).unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_delete_one() {
        let dir = TempDir::new().unwrap();
        put_file(dir.path(), "a.jpg", None).await;
        let extensions = Extensions::default();
        let mut log = RetentionLog::new();
        log.record("a.jpg", now());
        log.mark_clean();

        let name = DeletionExecutor::new(dir.path(), &extensions)
            .delete_one("a.jpg", &mut log)
            .await
            .expect("delete file");

        assert_eq!(name.as_str(), "a.jpg");
        assert!(!dir.path().join("a.jpg").exists());
        assert!(log.is_empty());
        assert!(log.is_dirty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_delete_missing_file_purges_log() {
        let dir = TempDir::new().unwrap();
        let extensions = Extensions::default();
        let mut log = RetentionLog::new();
        log.record("gone.png", now());
        log.mark_clean();

        let err = DeletionExecutor::new(dir.path(), &extensions)
            .delete_one("gone.png", &mut log)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::FileNotFound(name) if name.as_str() == "gone.png"));
        assert!(log.is_empty());
        assert!(log.is_dirty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_delete_invalid_name_does_no_io() {
        let dir = TempDir::new().unwrap();
        let outside = dir.path().join("secret.jpg");
        put_file(dir.path(), "secret.jpg", None).await;
        let storage = dir.path().join("uploads");
        fs::create_dir(&storage).await.unwrap();
        let extensions = Extensions::default();
        let mut log = RetentionLog::new();

        let err = DeletionExecutor::new(&storage, &extensions)
            .delete_one("../secret.jpg", &mut log)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidSelection(_)));
        assert!(outside.exists());
        assert!(!log.is_dirty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_delete_directory_is_not_found() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("folder.jpg")).await.unwrap();
        let extensions = Extensions::default();
        let mut log = RetentionLog::new();

        let err = DeletionExecutor::new(dir.path(), &extensions)
            .delete_one("folder.jpg", &mut log)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::FileNotFound(_)));
        assert!(dir.path().join("folder.jpg").is_dir());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unlink_failure_keeps_log_entry() {
        let dir = TempDir::new().unwrap();
        // Unlinking a directory fails regardless of permissions
        fs::create_dir(dir.path().join("stuck.jpg")).await.unwrap();
        let extensions = Extensions::default();
        let name = ImageName::parse("stuck.jpg", &extensions).unwrap();
        let mut log = RetentionLog::new();
        log.record("stuck.jpg", now());
        log.mark_clean();

        let err = DeletionExecutor::new(dir.path(), &extensions)
            .unlink(&name, &mut log)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DeletionFailed { name, .. } if name.as_str() == "stuck.jpg"));
        assert_eq!(log.first_seen("stuck.jpg"), Some(now()));
        assert!(!log.is_dirty());
    }

    #[cfg(unix)]
    #[tokio::test]
    #[traced_test]
    async fn test_delete_in_read_only_directory() {
        use crate::reconciler::fixtures::{make_read_only, make_writable};

        let dir = TempDir::new().unwrap();
        put_file(dir.path(), "locked.jpg", None).await;
        put_file(dir.path(), "other.jpg", None).await;
        let extensions = Extensions::default();
        let mut log = RetentionLog::new();
        log.record("locked.jpg", now());
        log.record("other.jpg", now());
        log.mark_clean();
        if !make_read_only(dir.path()) {
            return;
        }

        let executor = DeletionExecutor::new(dir.path(), &extensions);
        let single = executor.delete_one("locked.jpg", &mut log).await;
        let report = executor
            .delete_many(["locked.jpg", "other.jpg"], &mut log)
            .await;
        make_writable(dir.path());

        assert!(matches!(single, Err(Error::DeletionFailed { .. })));
        assert!(report.deleted.is_empty());
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .all(|err| matches!(err, Error::DeletionFailed { .. })));
        assert!(dir.path().join("locked.jpg").exists());
        assert!(dir.path().join("other.jpg").exists());
        assert_eq!(log.first_seen("locked.jpg"), Some(now()));
        assert_eq!(log.first_seen("other.jpg"), Some(now()));
        assert!(!log.is_dirty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_delete_many_mixed_batch() {
        let dir = TempDir::new().unwrap();
        put_file(dir.path(), "valid.jpg", None).await;
        let extensions = Extensions::default();
        let mut log = RetentionLog::new();
        log.record("valid.jpg", now());
        log.record("deleted.png", now());
        log.mark_clean();

        let report = DeletionExecutor::new(dir.path(), &extensions)
            .delete_many(
                ["valid.jpg", "../etc/passwd.jpg", " valid.jpg", "deleted.png"],
                &mut log,
            )
            .await;

        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.deleted[0].as_str(), "valid.jpg");
        assert_eq!(report.errors.len(), 2);
        assert!(matches!(report.errors[0], Error::InvalidSelection(_)));
        assert!(matches!(&report.errors[1], Error::FileNotFound(name) if name.as_str() == "deleted.png"));
        assert!(log.is_empty());
        assert_eq!(report.message().as_deref(), Some("Deleted valid.jpg."));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_delete_many_reports_each_invalid_name_once() {
        let dir = TempDir::new().unwrap();
        let extensions = Extensions::default();
        let mut log = RetentionLog::new();

        let report = DeletionExecutor::new(dir.path(), &extensions)
            .delete_many(["a.exe", "a.exe", "b.exe"], &mut log)
            .await;

        assert!(report.deleted.is_empty());
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.message(), None);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_delete_many_empty_selection() {
        let dir = TempDir::new().unwrap();
        let extensions = Extensions::default();
        let mut log = RetentionLog::new();

        let report = DeletionExecutor::new(dir.path(), &extensions)
            .delete_many(Vec::<String>::new(), &mut log)
            .await;

        assert!(matches!(report.errors.as_slice(), [Error::NothingSelected]));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_delete_many_counts_files() {
        let dir = TempDir::new().unwrap();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            put_file(dir.path(), name, None).await;
        }
        let extensions = Extensions::default();
        let mut log = RetentionLog::new();

        let report = DeletionExecutor::new(dir.path(), &extensions)
            .delete_many(["a.jpg", "b.jpg", "c.jpg"], &mut log)
            .await;

        assert!(report.errors.is_empty());
        assert_eq!(report.message().as_deref(), Some("Deleted 3 files."));
    }
}
