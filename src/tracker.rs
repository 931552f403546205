use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use tracing::{debug, error, info, warn};

use crate::deletion::DeletionExecutor;
use crate::errors::Error;
use crate::expiry_policy::ExpiryPolicy;
use crate::image::{Extensions, ImageFile, ImageName};
use crate::reconciler::{Reconciler, Reconciliation};
use crate::retention_log::{JsonLogStore, LogStore, RetentionLog};
use crate::settings::{JsonSettingsProvider, Settings, SettingsProvider};
use crate::upload;

type Result<T> = std::result::Result<T, Error>;

/// Default name of the storage directory.
pub const STORAGE_DIR_NAME: &str = "uploads";

/// Default name of the retention log file.
pub const LOG_FILE_NAME: &str = "image_log.json";

/// Default name of the settings file.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Tracker locations. Use [`TrackerConfigBuilder`] to create.
#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct TrackerConfig {
    /// Directory holding the image files.
    storage_dir: PathBuf,

    /// Retention log document.
    ///
    /// Should not be placed into the storage directory.
    log_path: PathBuf,

    /// Settings document.
    settings_path: PathBuf,

    /// Allowed image extensions.
    #[builder(default)]
    extensions: Extensions,
}

impl TrackerConfig {
    /// Create new builder for tracker config.
    pub fn builder() -> TrackerConfigBuilder {
        TrackerConfigBuilder::default()
    }

    /// Default layout inside `root`: `uploads/`, `image_log.json` and `settings.json`.
    pub fn in_dir(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            storage_dir: root.join(STORAGE_DIR_NAME),
            log_path: root.join(LOG_FILE_NAME),
            settings_path: root.join(SETTINGS_FILE_NAME),
            extensions: Extensions::default(),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }
}

/// Slideshow view.
#[derive(Debug)]
pub struct Gallery {
    /// Live images, soonest expiration first. Expired ones were already deleted.
    pub images: Vec<ImageFile>,

    /// Settings in effect for this request.
    pub settings: Settings,

    /// Non-fatal failures.
    pub errors: Vec<Error>,
}

/// File manager view.
#[derive(Debug)]
pub struct FileListing {
    /// Files on disk, soonest expiration first. Expired ones are flagged, not deleted.
    pub files: Vec<ImageFile>,

    /// Settings in effect for this request.
    pub settings: Settings,

    /// Outcome messages of the request.
    pub messages: Vec<String>,

    /// Non-fatal failures.
    pub errors: Vec<Error>,
}

/// File lifecycle tracker.
///
/// Every request reloads settings and the retention log, runs one reconciliation pass and
/// persists the log at most once. Nothing is cached between requests, so concurrent requests
/// against the same storage are safe.
///
/// Expiration is enforced by [`Tracker::gallery`]. [`Tracker::files`] keeps expired files for
/// manual deletion.
pub struct Tracker<L = JsonLogStore, S = JsonSettingsProvider> {
    storage_dir: PathBuf,
    extensions: Extensions,
    log_store: L,
    settings: S,
}

impl Tracker {
    /// Open tracker with JSON documents at configured locations.
    pub fn open(config: TrackerConfig) -> Self {
        Self::new(
            config.storage_dir,
            config.extensions,
            JsonLogStore::new(config.log_path),
            JsonSettingsProvider::new(config.settings_path),
        )
    }
}

impl<L: LogStore, S: SettingsProvider> Tracker<L, S> {
    /// Create tracker with custom log store and settings provider.
    pub fn new(
        storage_dir: impl Into<PathBuf>,
        extensions: Extensions,
        log_store: L,
        settings: S,
    ) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            extensions,
            log_store,
            settings,
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Current settings.
    pub async fn settings(&self) -> Settings {
        self.settings.get().await
    }

    /// Clamp and store new settings.
    pub async fn update_settings(&self, settings: Settings) -> Result<Settings> {
        Ok(self.settings.set(settings).await?)
    }

    /// Slideshow: reconcile with auto-expiry.
    ///
    /// # Errors
    ///
    /// Fails only if the storage directory is unavailable.
    pub async fn gallery(&self) -> Result<Gallery> {
        self.gallery_at(Utc::now()).await
    }

    /// File manager: reconcile keeping expired files.
    ///
    /// # Errors
    ///
    /// Fails only if the storage directory is unavailable.
    pub async fn files(&self) -> Result<FileListing> {
        self.files_at(Utc::now()).await
    }

    /// Delete selected files, then reconcile keeping expired files.
    ///
    /// Per-file failures are reported in [`FileListing::errors`].
    ///
    /// # Errors
    ///
    /// Fails only if the storage directory is unavailable.
    pub async fn delete<I, T>(&self, names: I) -> Result<FileListing>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.delete_at(names, Utc::now()).await
    }

    /// Place uploaded file into the storage directory.
    ///
    /// The file gets its first-seen timestamp on the next pass.
    pub async fn upload(&self, original_name: &str, source: &Path) -> Result<ImageName> {
        upload::store(&self.storage_dir, &self.extensions, original_name, source).await
    }

    pub(crate) async fn gallery_at(&self, now: DateTime<Utc>) -> Result<Gallery> {
        let settings = self.settings.get().await;
        let mut log = self.log_store.load().await;
        let pass = self
            .reconcile(&mut log, &settings, ExpiryPolicy::Enforce, now)
            .await?;
        let mut errors = pass.errors;
        self.persist(&mut log, &mut errors).await;
        Ok(Gallery {
            images: pass.files,
            settings,
            errors,
        })
    }

    pub(crate) async fn files_at(&self, now: DateTime<Utc>) -> Result<FileListing> {
        let settings = self.settings.get().await;
        let log = self.log_store.load().await;
        self.listing(settings, log, vec![], vec![], now).await
    }

    pub(crate) async fn delete_at<I, T>(&self, names: I, now: DateTime<Utc>) -> Result<FileListing>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let settings = self.settings.get().await;
        let mut log = self.log_store.load().await;
        let report = DeletionExecutor::new(&self.storage_dir, &self.extensions)
            .delete_many(names, &mut log)
            .await;
        let messages = report.message().into_iter().collect();
        self.listing(settings, log, messages, report.errors, now).await
    }

    /// Reconcile keeping expired files and persist the log once.
    async fn listing(
        &self,
        settings: Settings,
        mut log: RetentionLog,
        messages: Vec<String>,
        mut errors: Vec<Error>,
        now: DateTime<Utc>,
    ) -> Result<FileListing> {
        let pass = self
            .reconcile(&mut log, &settings, ExpiryPolicy::Retain, now)
            .await?;
        errors.extend(pass.errors);
        self.persist(&mut log, &mut errors).await;
        Ok(FileListing {
            files: pass.files,
            settings,
            messages,
            errors,
        })
    }

    async fn reconcile(
        &self,
        log: &mut RetentionLog,
        settings: &Settings,
        policy: ExpiryPolicy,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation> {
        Reconciler::new(
            &self.storage_dir,
            &self.extensions,
            settings.retention_window(),
            policy,
        )
        .run(log, now)
        .await
        .inspect_err(|err| error!("reconciliation failed: {:?}", err))
    }

    /// Save the log if it changed. Failure is reported, the request goes on.
    async fn persist(&self, log: &mut RetentionLog, errors: &mut Vec<Error>) {
        if !log.is_dirty() {
            debug!("retention log unchanged");
            return;
        }
        match self.log_store.save(log).await {
            Ok(()) => {
                log.mark_clean();
                info!("retention log persisted");
            }
            Err(err) => {
                warn!("failed to persist retention log: {:?}", err);
                errors.push(err.into());
            }
        }
    }
}

impl<L, S> fmt::Debug for Tracker<L, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("storage_dir", &self.storage_dir)
            .field("extensions", &self.extensions)
            .finish()
    }
}
