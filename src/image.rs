//! Objects operated by tracker.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Serialize, Serializer};

use crate::errors::Error;

/// Extensions accepted by default (compared lowercased).
pub const DEFAULT_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// URL path prefix under which stored images are served.
pub const URL_PREFIX: &str = "uploads/";

/// Characters left as is when building URLs: `A-Z a-z 0-9 - _ . ~`.
const URL_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Allow-list of image file extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extensions(BTreeSet<String>);

impl Default for Extensions {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS)
    }
}

impl Extensions {
    /// Create allow-list from extensions without leading dot.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
        )
    }

    /// Whether `name` carries an allowed extension (case-insensitive).
    pub fn matches(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.0.contains(&ext.to_lowercase()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Name of an image file inside the storage directory.
///
/// Always a bare basename: no path separators, no `.`/`..`, not hidden,
/// and carrying an allowed extension.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageName(String);

impl ImageName {
    /// Normalize raw input and validate it.
    ///
    /// Surrounding whitespace is trimmed. Anything that is not exactly a basename is rejected
    /// with [`Error::InvalidSelection`], nothing is resolved against the filesystem.
    pub fn parse(raw: &str, extensions: &Extensions) -> Result<Self, Error> {
        let name = raw.trim();
        let invalid = || Error::InvalidSelection(raw.to_string());

        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\', '\0'])
            || !extensions.matches(name)
        {
            return Err(invalid());
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Percent-encoded URL path, e.g. `uploads/my%20meme.png`.
    pub fn url_path(&self) -> String {
        format!("{}{}", URL_PREFIX, utf8_percent_encode(&self.0, URL_COMPONENT))
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for ImageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<Path> for ImageName {
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl Serialize for ImageName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Live image file, as computed by one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageFile {
    pub name: ImageName,

    /// Size read from disk during the pass.
    pub size_bytes: u64,

    /// Moment the tracker first observed the file.
    pub first_seen: DateTime<Utc>,

    /// `first_seen + retention window`.
    pub expires_at: DateTime<Utc>,

    /// Whole days left before expiration, rounded up.
    pub days_left: i64,

    /// File outlived its retention window but was kept for manual deletion.
    pub expired: bool,
}

impl ImageFile {
    pub fn url_path(&self) -> String {
        self.name.url_path()
    }

    pub fn size_label(&self) -> String {
        format_bytes(self.size_bytes)
    }

    /// Expires within a day.
    pub fn is_expiring(&self) -> bool {
        self.days_left <= 1
    }
}

/// Format byte count as a human-readable size: `512 B`, `1.5 KB`, `3.0 MB`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    for unit in ["KB", "MB", "GB", "TB"] {
        if value < 1024.0 {
            return format!("{} {}", group_thousands(value), unit);
        }
        value /= 1024.0;
    }
    format!("{} PB", group_thousands(value))
}

/// One decimal with `,` between thousands.
fn group_thousands(value: f64) -> String {
    let formatted = format!("{:.1}", value);
    let (int, frac) = formatted.split_at(formatted.len() - 2);
    let mut grouped = String::with_capacity(formatted.len() + int.len() / 3);
    for (i, ch) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped + frac
}
