//! # Memer
//!
//! File lifecycle tracker for a directory of uploaded images. Every image stays available for
//! a configurable retention window after it was first seen and then disappears.
//!
//! ## How it works
//!
//! Tracker state consists of three parts:
//!
//! - **storage directory** with the image files, which may change outside of the tracker;
//! - **retention log**, a JSON document remembering when each file was first seen;
//! - **settings**, a JSON document with slideshow interval and retention window.
//!
//! There is no background process. Every request runs one reconciliation pass: the directory
//! is listed, new files are recorded, stale log entries are pruned, expired files are deleted
//! (by the slideshow view) and the log is written back if it changed.
//!
//! ## Example
//!
//! ```rust
//! # tokio_test::block_on(async {
//! use memer::{Tracker, TrackerConfig};
//!
//! let root = tempfile::tempdir().unwrap();
//! let config = TrackerConfig::in_dir(root.path());
//! std::fs::create_dir_all(config.storage_dir()).unwrap();
//! std::fs::write(config.storage_dir().join("cat.png"), b"meow").unwrap();
//!
//! let tracker = Tracker::open(config);
//!
//! // Slideshow: expired files are deleted on view
//! let gallery = tracker.gallery().await.unwrap();
//! assert_eq!(gallery.images[0].name.as_str(), "cat.png");
//! assert_eq!(gallery.images[0].days_left, 300);
//!
//! // File manager: delete on request
//! let listing = tracker.delete(["cat.png"]).await.unwrap();
//! assert!(listing.files.is_empty());
//! # })
//! ```

mod deletion;
mod document;
mod expiry_policy;
mod image;
mod reconciler;
mod retention_log;
mod scanner;
mod tracker;

pub mod errors;
pub mod settings;
pub mod upload;

pub use deletion::{DeletionExecutor, DeletionReport};
pub use expiry_policy::ExpiryPolicy;
pub use image::{format_bytes, Extensions, ImageFile, ImageName, DEFAULT_EXTENSIONS};
pub use reconciler::{Lifetime, Reconciler, Reconciliation};
pub use retention_log::{JsonLogStore, LogStore, RecordDocumentOut, RetentionLog};
pub use scanner::{scan, ScannedFile};
pub use settings::{JsonSettingsProvider, Settings, SettingsProvider};
pub use tracker::{FileListing, Gallery, Tracker, TrackerConfig, TrackerConfigBuilder};

// Re-exports of public API arguments from extern crates
#[doc(no_inline)]
pub use chrono::{DateTime, TimeDelta, Utc};
