//! Retention log: durable record of the moment each file was first seen.
//!
//! The log is stored as a JSON object keyed by filename:
//!
//! ```json
//! {
//!   "cat.jpg": { "firstSeen": "2026-01-02T03:04:05Z" }
//! }
//! ```
//!
//! Timestamps are parsed once at the read boundary and kept as [`DateTime<Utc>`] in memory.
//! Accepted forms are integer epoch seconds, numeric strings and ISO-8601 strings; the
//! `first_seen` key is accepted as well. Unknown fields are ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::document;
use crate::errors::PersistenceError;
use crate::settings::RETENTION_DAYS_RANGE;

/// Formats of timestamps without offset, interpreted as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// In-memory retention log.
///
/// Tracks whether it was changed since it was loaded, so it is only written back when needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionLog {
    entries: BTreeMap<String, DateTime<Utc>>,
    dirty: bool,
}

impl RetentionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build log from a parsed document.
    ///
    /// Entries with a missing or unparseable timestamp get `fallback` and the log is marked
    /// dirty, so the repaired value is persisted. Anything but a JSON object yields an empty log.
    pub fn from_document(document: Value, fallback: DateTime<Utc>) -> Self {
        let mut log = Self::new();
        let Value::Object(map) = document else {
            warn!("retention log is not an object, starting with an empty log");
            return log;
        };

        for (name, value) in map {
            let parsed = serde_json::from_value::<RecordDocument>(value)
                .ok()
                .and_then(|record| record.first_seen)
                .and_then(RawTimestamp::parse)
                .filter(|first_seen| has_representable_expiry(*first_seen));
            match parsed {
                Some(first_seen) => {
                    log.entries.insert(name, first_seen);
                }
                None => {
                    warn!(
                        "unparseable first-seen timestamp of '{}', using {}",
                        name, fallback
                    );
                    log.entries.insert(name, truncate_to_seconds(fallback));
                    log.dirty = true;
                }
            }
        }
        log
    }

    /// Serializable view of the log.
    pub fn to_document(&self) -> BTreeMap<&str, RecordDocumentOut> {
        self.entries
            .iter()
            .map(|(name, first_seen)| {
                (
                    name.as_str(),
                    RecordDocumentOut {
                        first_seen: first_seen.to_rfc3339_opts(SecondsFormat::Secs, true),
                    },
                )
            })
            .collect()
    }

    pub fn first_seen(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries.get(name).copied()
    }

    /// Record first-seen timestamp for a new file.
    ///
    /// First-seen is immutable: if `name` is already logged, nothing changes.
    /// Returns the effective timestamp, truncated to whole seconds.
    pub fn record(&mut self, name: &str, first_seen: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(existing) = self.entries.get(name) {
            return *existing;
        }
        let first_seen = truncate_to_seconds(first_seen);
        self.entries.insert(name.to_string(), first_seen);
        self.dirty = true;
        first_seen
    }

    /// Remove entry. Returns `true` if it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.entries.remove(name).is_some();
        self.dirty |= removed;
        removed
    }

    /// Keep only entries for which `keep` returns `true`.
    ///
    /// Returns names of removed entries.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        let removed: Vec<String> = self
            .entries
            .keys()
            .filter(|name| !keep(name))
            .cloned()
            .collect();
        for name in &removed {
            self.entries.remove(name);
        }
        self.dirty |= !removed.is_empty();
        removed
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the log changed since it was loaded or last saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Stored record as read from document.
#[derive(Deserialize, Debug)]
struct RecordDocument {
    #[serde(default, rename = "firstSeen", alias = "first_seen")]
    first_seen: Option<RawTimestamp>,
}

/// Stored record as written to document.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RecordDocumentOut {
    #[serde(rename = "firstSeen")]
    pub first_seen: String,
}

/// Timestamp as found in the document, before normalization.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RawTimestamp {
    Epoch(i64),
    FractionalEpoch(f64),
    Text(String),
}

impl RawTimestamp {
    fn parse(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Epoch(secs) => DateTime::from_timestamp(secs, 0),
            Self::FractionalEpoch(secs) => DateTime::from_timestamp(secs.trunc() as i64, 0),
            Self::Text(text) => parse_text(&text),
        }
    }
}

/// Parse timestamp string: numeric epoch, RFC 3339, ISO-8601 without offset or a bare date.
fn parse_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    if let Ok(secs) = text.parse::<f64>() {
        return secs
            .is_finite()
            .then(|| DateTime::from_timestamp(secs.trunc() as i64, 0))
            .flatten();
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Some(truncate_to_seconds(timestamp.to_utc()));
    }
    if let Ok(timestamp) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(truncate_to_seconds(timestamp.to_utc()));
    }
    for format in NAIVE_FORMATS {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(text, format) {
            return Some(truncate_to_seconds(timestamp.and_utc()));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|timestamp| timestamp.and_utc())
}

/// Whether `first_seen` plus the longest retention window is still a valid date.
pub(crate) fn has_representable_expiry(first_seen: DateTime<Utc>) -> bool {
    let longest = TimeDelta::days((*RETENTION_DAYS_RANGE.end()).into());
    first_seen.checked_add_signed(longest).is_some()
}

pub(crate) fn truncate_to_seconds(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp.timestamp(), 0).unwrap_or(timestamp)
}

/// Durable storage of the retention log.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Read the log.
    ///
    /// Never fails: an absent or unparseable record yields an empty log.
    async fn load(&self) -> RetentionLog;

    /// Replace the stored log with `log`.
    async fn save(&self, log: &RetentionLog) -> Result<(), PersistenceError>;
}

/// Retention log kept in a JSON file.
#[derive(Debug, Clone)]
pub struct JsonLogStore {
    path: PathBuf,
}

impl JsonLogStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LogStore for JsonLogStore {
    async fn load(&self) -> RetentionLog {
        match document::read(&self.path).await {
            Some(value) => {
                let log = RetentionLog::from_document(value, Utc::now());
                debug!("retention log loaded: {} entries", log.len());
                log
            }
            None => RetentionLog::new(),
        }
    }

    async fn save(&self, log: &RetentionLog) -> Result<(), PersistenceError> {
        debug!("saving retention log: {} entries", log.len());
        document::write(&self.path, &log.to_document()).await
    }
}
