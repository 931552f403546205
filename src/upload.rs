//! Placing uploaded files into the storage directory.
//!
//! Storing is the only thing needed from an upload: the next reconciliation pass discovers the
//! new file like any other.

use std::io::ErrorKind;
use std::path::Path;

use chrono::Utc;
use tokio::fs::{self, OpenOptions};
use tokio::io;
use tracing::{debug, info, warn};

use crate::errors::Error;
use crate::image::{Extensions, ImageName};

/// Attempts to find a free name before giving up.
const MAX_ATTEMPTS: usize = 8;

/// Length of the suffix appended on name collision.
const SUFFIX_LEN: usize = 13;

/// Copy `source` into `dir` under a sanitized form of `original_name`.
///
/// Only the basename of `original_name` is used. Characters outside `[A-Za-z0-9._-]` are
/// replaced with `_`. If the name is taken, `_<suffix>` is appended before the extension.
/// Existing files are never overwritten.
///
/// # Errors
///
/// - [`Error::InvalidSelection`] if the extension is not allowed;
/// - [`Error::DirectoryUnavailable`] if `dir` is missing;
/// - [`Error::UploadFailed`] if copying failed.
pub async fn store(
    dir: &Path,
    extensions: &Extensions,
    original_name: &str,
    source: &Path,
) -> Result<ImageName, Error> {
    let basename = Path::new(original_name)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::InvalidSelection(original_name.to_string()))?;
    if !extensions.matches(basename) {
        return Err(Error::InvalidSelection(original_name.to_string()));
    }
    let clean = sanitize(basename);

    match fs::metadata(dir).await {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(Error::DirectoryUnavailable {
                path: dir.to_path_buf(),
                source: ErrorKind::NotADirectory.into(),
            })
        }
        Err(source) => {
            return Err(Error::DirectoryUnavailable {
                path: dir.to_path_buf(),
                source,
            })
        }
    }

    let mut candidate = clean.clone();
    for _ in 0..MAX_ATTEMPTS {
        let name = ImageName::parse(&candidate, extensions)?;
        match copy_new(source, &dir.join(&name)).await {
            Ok(bytes) => {
                info!("stored upload '{}' ({} bytes)", name, bytes);
                return Ok(name);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!("name '{}' is taken", name);
                candidate = with_suffix(&clean);
            }
            Err(source) => return Err(Error::UploadFailed { name, source }),
        }
    }
    Err(Error::UploadFailed {
        name: ImageName::parse(&clean, extensions)?,
        source: ErrorKind::AlreadyExists.into(),
    })
}

/// Copy `source` into a new file `target`. Fails if `target` exists.
async fn copy_new(source: &Path, target: &Path) -> io::Result<u64> {
    let mut input = fs::File::open(source).await?;
    let mut output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .await?;
    let result = async {
        let bytes = io::copy(&mut input, &mut output).await?;
        output.sync_all().await?;
        Ok::<_, io::Error>(bytes)
    }
    .await;
    if result.is_err() {
        // Partially written file must not be discovered
        if let Err(cleanup_err) = fs::remove_file(target).await {
            if cleanup_err.kind() != ErrorKind::NotFound {
                warn!(
                    "failed to remove partial upload '{}': {}",
                    target.display(),
                    cleanup_err
                );
            }
        }
    }
    result
}

/// Replace characters outside `[A-Za-z0-9._-]` with `_`; leading dots too.
pub fn sanitize(name: &str) -> String {
    let mut leading = true;
    name.chars()
        .map(|ch| {
            let keep = ch.is_ascii_alphanumeric()
                || matches!(ch, '_' | '-')
                || (ch == '.' && !leading);
            leading &= ch == '.';
            if keep {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// `cat.png` -> `cat_<suffix>.png` with lowercased extension.
fn with_suffix(name: &str) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_lowercase();
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let digest = sha256::digest(format!("{}:{}", name, nanos));
    format!("{}_{}.{}", stem, &digest[..SUFFIX_LEN], extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    #[rstest]
    #[case("cat.png", "cat.png")]
    #[case("my meme (1).JPG", "my_meme__1_.JPG")]
    #[case("çà.gif", "__.gif")]
    #[case("..secret.png", "__secret.png")]
    #[case("a.b-c_d.webp", "a.b-c_d.webp")]
    fn test_sanitize(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize(input), expected);
    }

    #[test]
    fn test_with_suffix() {
        let name = with_suffix("cat.PNG");
        assert!(name.starts_with("cat_"));
        assert!(name.ends_with(".png"));
        assert_eq!(name.len(), "cat_".len() + SUFFIX_LEN + ".png".len());
    }

    async fn source_file(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("incoming.tmp");
        fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    #[traced_test]
    async fn test_store() {
        let storage = TempDir::new().unwrap();
        let incoming = TempDir::new().unwrap();
        let source = source_file(&incoming, "image bytes").await;

        let name = store(
            storage.path(),
            &Extensions::default(),
            "C:\\fakepath/../my meme.png",
            &source,
        )
        .await
        .expect("store upload");

        assert_eq!(name.as_str(), "my_meme.png");
        let content = fs::read_to_string(storage.path().join(&name)).await.unwrap();
        assert_eq!(content, "image bytes");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_store_never_overwrites() {
        let storage = TempDir::new().unwrap();
        let incoming = TempDir::new().unwrap();
        fs::write(storage.path().join("cat.png"), "first").await.unwrap();
        let source = source_file(&incoming, "second").await;

        let name = store(storage.path(), &Extensions::default(), "cat.png", &source)
            .await
            .expect("store upload");

        assert_ne!(name.as_str(), "cat.png");
        assert!(name.as_str().starts_with("cat_"));
        let first = fs::read_to_string(storage.path().join("cat.png")).await.unwrap();
        assert_eq!(first, "first");
    }

    #[cfg(unix)]
    #[tokio::test]
    #[traced_test]
    async fn test_failed_copy_leaves_no_partial_file() {
        let storage = TempDir::new().unwrap();
        let incoming = TempDir::new().unwrap();

        // A directory opens fine but cannot be read from
        let err = store(
            storage.path(),
            &Extensions::default(),
            "cat.png",
            incoming.path(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::UploadFailed { .. }));
        assert!(!storage.path().join("cat.png").exists());
        assert!(!logs_contain("failed to remove partial upload"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_store_rejects_extension() {
        let storage = TempDir::new().unwrap();
        let incoming = TempDir::new().unwrap();
        let source = source_file(&incoming, "<?php").await;

        let err = store(storage.path(), &Extensions::default(), "shell.php", &source)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSelection(_)));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_store_into_missing_directory() {
        let storage = TempDir::new().unwrap();
        let incoming = TempDir::new().unwrap();
        let source = source_file(&incoming, "bytes").await;

        let err = store(
            &storage.path().join("missing"),
            &Extensions::default(),
            "cat.png",
            &source,
        )
        .await
        .unwrap_err();
        assert!(err.is_fatal());
    }
}
