use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::fs::{self, DirEntry};
use tracing::{debug, trace, warn};

use crate::errors::{Error, NonUtf8NameError};
use crate::image::{Extensions, ImageName};

/// Regular image file found in the storage directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub name: ImageName,
    pub size_bytes: u64,

    /// Modification time, if the filesystem reports one.
    pub modified: Option<DateTime<Utc>>,
}

/// List image files directly inside `dir`.
///
/// Non-recursive. Subdirectories, symlinks, hidden entries and files without an allowed
/// extension are skipped. Entries are returned sorted by name.
///
/// # Errors
///
/// Returns [`Error::DirectoryUnavailable`] if `dir` does not exist or cannot be read.
pub async fn scan(dir: &Path, extensions: &Extensions) -> Result<Vec<ScannedFile>, Error> {
    debug!("scanning storage directory: {}", dir.display());
    let unavailable = |source| Error::DirectoryUnavailable {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir).await.map_err(unavailable)?;
    let mut files = vec![];
    while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
        match check_dir_entry(&entry, extensions).await {
            Ok(Some(file)) => files.push(file),
            Ok(None) => {}
            Err(err) => {
                warn!("skipping entry '{}': {}", entry.path().display(), err);
            }
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    debug!("image files found: {}", files.len());
    Ok(files)
}

/// Turn directory entry into [`ScannedFile`] if it is a regular image file.
async fn check_dir_entry(
    entry: &DirEntry,
    extensions: &Extensions,
) -> Result<Option<ScannedFile>, Box<dyn std::error::Error + Send + Sync>> {
    let file_name = entry.file_name();
    let file_name = file_name.to_str().ok_or(NonUtf8NameError)?;
    let Ok(name) = ImageName::parse(file_name, extensions) else {
        trace!("not an image file: {}", file_name);
        return Ok(None);
    };
    // `parse` trims input, a name that differs from the entry cannot be addressed
    if name.as_str() != file_name {
        trace!("name with surrounding whitespace: '{}'", file_name);
        return Ok(None);
    }

    // Does not follow symlinks
    let metadata = entry.metadata().await?;
    if !metadata.is_file() {
        debug!("entry is not a regular file: {}", entry.path().display());
        return Ok(None);
    }

    Ok(Some(ScannedFile {
        name,
        size_bytes: metadata.len(),
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
    }))
}
