//! Lifecycle reconciliation.
//!
//! A pass merges the storage directory listing with the retention log:
//!
//! 1. files missing from the log are recorded with their modification time (or `now`);
//! 2. lifetime of every file is computed against the retention window;
//! 3. under [`ExpiryPolicy::Enforce`] expired files are deleted, log entry included;
//! 4. log entries without a file in the listing are pruned.
//!
//! The listing taken at the start of the pass is authoritative for the whole pass. Persisting
//! the log is left to the caller, see [`RetentionLog::is_dirty`].

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::errors::Error;
use crate::expiry_policy::ExpiryPolicy;
use crate::image::{Extensions, ImageFile, ImageName};
use crate::retention_log::{has_representable_expiry, RetentionLog};
use crate::scanner;

const SECONDS_PER_DAY: i64 = 86_400;

/// Lifetime of a file at a given moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime {
    pub first_seen: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining: TimeDelta,
    pub days_left: i64,
    pub expired: bool,
}

impl Lifetime {
    /// Compute lifetime of a file first seen at `first_seen`.
    ///
    /// Age is floored at zero, so future-dated timestamps never shorten the window. Days left
    /// are rounded up, a started second included. Expiry past the supported date range is
    /// capped at [`DateTime::<Utc>::MAX_UTC`].
    pub fn compute(first_seen: DateTime<Utc>, window: TimeDelta, now: DateTime<Utc>) -> Self {
        let age = (now - first_seen).max(TimeDelta::zero());
        let remaining = (window - age).max(TimeDelta::zero());
        let started_second = i64::from(remaining.subsec_nanos() > 0);
        let remaining_secs = remaining.num_seconds() + started_second;
        let days_left = (remaining_secs + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY;
        Self {
            first_seen,
            expires_at: first_seen
                .checked_add_signed(window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            remaining,
            days_left,
            expired: age >= window,
        }
    }
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Live files, soonest expiration first.
    pub files: Vec<ImageFile>,

    /// Files deleted by auto-expiry.
    pub expired: Vec<ImageName>,

    /// Log entries removed because their file is gone.
    pub pruned: Vec<String>,

    /// Non-fatal failures.
    pub errors: Vec<Error>,
}

/// Runs reconciliation passes over a storage directory.
#[derive(Debug, Clone)]
pub struct Reconciler<'a> {
    dir: &'a Path,
    extensions: &'a Extensions,
    window: TimeDelta,
    policy: ExpiryPolicy,
}

impl<'a> Reconciler<'a> {
    /// Create new reconciler for `dir` with retention `window`.
    pub fn new(
        dir: &'a Path,
        extensions: &'a Extensions,
        window: TimeDelta,
        policy: ExpiryPolicy,
    ) -> Self {
        Self {
            dir,
            extensions,
            window,
            policy,
        }
    }

    /// Run reconciliation pass once, updating `log` in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryUnavailable`] if the storage directory cannot be listed.
    /// The log is left untouched in that case.
    pub async fn run(
        &self,
        log: &mut RetentionLog,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation, Error> {
        info!(
            "reconciling '{}' ({}, window {}s)",
            self.dir.display(),
            self.policy,
            self.window.num_seconds()
        );
        let listing = scanner::scan(self.dir, self.extensions).await?;
        let listed: HashSet<String> = listing
            .iter()
            .map(|file| file.name.to_string())
            .collect();

        let mut result = Reconciliation::default();
        let mut discovered = 0;
        for scanned in listing {
            let name = scanned.name;
            let first_seen = match log.first_seen(name.as_str()) {
                Some(first_seen) => first_seen,
                None => {
                    discovered += 1;
                    let modified = scanned
                        .modified
                        .filter(|modified| has_representable_expiry(*modified));
                    let first_seen = log.record(name.as_str(), modified.unwrap_or(now));
                    debug!("discovered '{}', first seen {}", name, first_seen);
                    first_seen
                }
            };

            let lifetime = Lifetime::compute(first_seen, self.window, now);
            if lifetime.expired && self.policy.deletes_expired() {
                match self.expire(&name).await {
                    Ok(()) => {
                        log.remove(name.as_str());
                        result.expired.push(name);
                    }
                    Err(err) => {
                        error!("failed to delete expired file '{}': {:?}", name, err);
                        result.errors.push(err);
                    }
                }
                continue;
            }

            result.files.push(ImageFile {
                name,
                size_bytes: scanned.size_bytes,
                first_seen: lifetime.first_seen,
                expires_at: lifetime.expires_at,
                days_left: lifetime.days_left,
                expired: lifetime.expired,
            });
        }

        result.pruned = log.retain(|name| listed.contains(name));
        for name in &result.pruned {
            debug!("pruned stale log entry '{}'", name);
        }

        result.files.sort_by(|a, b| {
            a.expires_at
                .cmp(&b.expires_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        info!(
            "reconciled: live {}, discovered {}, expired {}, pruned {}",
            result.files.len(),
            discovered,
            result.expired.len(),
            result.pruned.len()
        );
        Ok(result)
    }

    /// Unlink an expired file. A file that is already gone counts as deleted.
    async fn expire(&self, name: &ImageName) -> Result<(), Error> {
        match fs::remove_file(self.dir.join(name)).await {
            Ok(()) => {
                info!("expired file '{}' removed", name);
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("expired file '{}' vanished before removal", name);
                Ok(())
            }
            Err(source) => Err(Error::DeletionFailed {
                name: name.clone(),
                source,
            }),
        }
    }
}
