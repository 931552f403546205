//! Runtime settings: slideshow interval and retention window.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::document;
use crate::errors::PersistenceError;

pub const DEFAULT_INTERVAL_SECONDS: u32 = 5;
pub const DEFAULT_RETENTION_DAYS: u32 = 300;

/// Interval values accepted on write.
pub const INTERVAL_SECONDS_RANGE: RangeInclusive<u32> = 1..=3600;

/// Retention values accepted on write.
pub const RETENTION_DAYS_RANGE: RangeInclusive<u32> = 1..=3650;

const SECONDS_PER_DAY: i64 = 86_400;

/// Process-wide settings, reloaded on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Slideshow rotation interval.
    pub interval_seconds: u32,

    /// How long a file is kept after it was first seen.
    pub retention_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl Settings {
    pub fn new(interval_seconds: u32, retention_days: u32) -> Self {
        Self {
            interval_seconds,
            retention_days,
        }
    }

    /// Read settings from a parsed document.
    ///
    /// Each field is read on its own: a missing or malformed field takes its default without
    /// discarding the other one. Numeric strings are accepted, values are clamped into the
    /// write bounds.
    pub fn from_document(document: &Value) -> Self {
        let field = |keys: [&str; 2], range: RangeInclusive<u32>, default: u32| {
            keys.iter()
                .find_map(|key| document.get(key).and_then(parse_number))
                .map(|value| value.clamp((*range.start()).into(), (*range.end()).into()) as u32)
                .unwrap_or(default)
        };
        Self {
            interval_seconds: field(
                ["intervalSeconds", "interval"],
                INTERVAL_SECONDS_RANGE,
                DEFAULT_INTERVAL_SECONDS,
            ),
            retention_days: field(
                ["retentionDays", "expire_days"],
                RETENTION_DAYS_RANGE,
                DEFAULT_RETENTION_DAYS,
            ),
        }
    }

    /// Clamp values into accepted write bounds.
    pub fn clamped(self) -> Self {
        Self {
            interval_seconds: self
                .interval_seconds
                .clamp(*INTERVAL_SECONDS_RANGE.start(), *INTERVAL_SECONDS_RANGE.end()),
            retention_days: self
                .retention_days
                .clamp(*RETENTION_DAYS_RANGE.start(), *RETENTION_DAYS_RANGE.end()),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.into())
    }

    pub fn retention_window(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.retention_days) * SECONDS_PER_DAY)
    }
}

impl std::fmt::Display for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "interval: {}s, expires after {} days",
            self.interval_seconds, self.retention_days
        )
    }
}

/// Integer or numeric string, fractions truncated.
fn parse_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|v| v.trunc() as i64)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(|v| v.trunc() as i64)
            })
        }
        _ => None,
    }
}

/// Source of runtime settings.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// Current settings. Absent or malformed data falls back to defaults.
    async fn get(&self) -> Settings;

    /// Clamp and store settings. Returns the stored values.
    async fn set(&self, settings: Settings) -> Result<Settings, PersistenceError>;
}

/// Settings kept in a JSON file.
#[derive(Debug, Clone)]
pub struct JsonSettingsProvider {
    path: PathBuf,
}

impl JsonSettingsProvider {
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
impl SettingsProvider for JsonSettingsProvider {
    async fn get(&self) -> Settings {
        let settings = document::read(&self.path)
            .await
            .map(|value| Settings::from_document(&value))
            .unwrap_or_default();
        debug!("settings loaded: {}", settings);
        settings
    }

    async fn set(&self, settings: Settings) -> Result<Settings, PersistenceError> {
        let settings = settings.clamped();
        document::write(&self.path, &settings).await?;
        info!("settings updated: {}", settings);
        Ok(settings)
    }
}
