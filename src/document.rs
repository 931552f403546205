//! Durable JSON documents: retention log and settings.
//!
//! Documents are advisory. Reading never fails: an absent or unreadable document is reported
//! as `None` and callers fall back to defaults. Writing replaces the whole file atomically, so
//! concurrent readers observe either the previous or the new content.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::errors::PersistenceError;

/// Sequence number making temporary file names unique within the process.
static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Read and parse JSON document at `path`.
///
/// Returns `None` if the document is absent, cannot be read or is not valid JSON.
pub(crate) async fn read(path: &Path) -> Option<Value> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("document '{}' does not exist yet", path.display());
            return None;
        }
        Err(err) => {
            warn!("failed to read document '{}': {}", path.display(), err);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("document '{}' is malformed: {}", path.display(), err);
            None
        }
    }
}

/// Serialize `document` as pretty JSON and replace the file at `path` with it.
///
/// Content is written into a temporary file next to `path`, flushed to disk and renamed over
/// the target.
pub(crate) async fn write<T>(path: &Path, document: &T) -> Result<(), PersistenceError>
where
    T: Serialize + ?Sized,
{
    let content =
        serde_json::to_vec_pretty(document).map_err(|err| PersistenceError::new(path, err))?;
    let temp_path = temp_path(path);
    trace!("writing document into {}", temp_path.display());

    let result = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(err) = result {
        if let Err(cleanup_err) = fs::remove_file(&temp_path).await {
            if cleanup_err.kind() != ErrorKind::NotFound {
                warn!(
                    "failed to remove temporary file '{}': {}",
                    temp_path.display(),
                    cleanup_err
                );
            }
        }
        return Err(PersistenceError::new(path, err));
    }
    debug!("document '{}' saved", path.display());
    Ok(())
}

/// `<dir>/<file>.tmp.<pid>.<seq>`, distinct for every write.
fn temp_path(path: &Path) -> PathBuf {
    let sequence = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".tmp.{}.{}", std::process::id(), sequence));
    path.with_file_name(name)
}
