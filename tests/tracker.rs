//! Tracker integration tests.

use std::time::{Duration, SystemTime};

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::fs;

use memer::errors::Error;
use memer::settings::Settings;
use memer::{DateTime, Tracker, TrackerConfig, Utc};

const DAY: u64 = 86_400;

fn epoch_days_ago(days: u64) -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        - days * DAY
}

async fn read_log(root: &TempDir) -> Value {
    let content = fs::read_to_string(root.path().join("image_log.json")).await.unwrap();
    serde_json::from_str(&content).unwrap()
}

#[tokio::test]
async fn test_lifecycle() -> anyhow::Result<()> {
    let root = TempDir::new()?;
    let config = TrackerConfig::in_dir(root.path());
    let storage = config.storage_dir().to_path_buf();
    fs::create_dir(&storage).await?;
    let tracker = Tracker::open(config);
    tracker.update_settings(Settings::new(10, 30)).await?;

    // A file appears outside of the tracker, with an old modification time
    let uploaded = storage.join("old.png");
    fs::write(&uploaded, b"png").await?;
    std::fs::File::options()
        .write(true)
        .open(&uploaded)?
        .set_modified(SystemTime::now() - Duration::from_secs(31 * DAY))?;

    // Another one arrives through the upload helper
    let incoming = root.path().join("incoming.bin");
    fs::write(&incoming, b"gif").await?;
    let name = tracker.upload("funny cat.gif", &incoming).await?;
    assert_eq!(name.as_str(), "funny_cat.gif");

    // Manager view keeps the expired file and flags it
    let listing = tracker.files().await?;
    let names: Vec<_> = listing.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["old.png", "funny_cat.gif"]);
    assert!(listing.files[0].expired);
    assert_eq!(listing.files[1].days_left, 30);
    assert_eq!(listing.files[1].url_path(), "uploads/funny_cat.gif");
    assert_eq!(read_log(&root).await.as_object().unwrap().len(), 2);

    // Slideshow deletes it
    let gallery = tracker.gallery().await?;
    assert_eq!(gallery.images.len(), 1);
    assert_eq!(gallery.settings.interval(), Duration::from_secs(10));
    assert!(!uploaded.exists());
    let log = read_log(&root).await;
    assert!(log.get("old.png").is_none());
    assert!(log.get("funny_cat.gif").is_some());

    // Manual deletion, twice: the second one races harmlessly
    let listing = tracker.delete(["funny_cat.gif"]).await?;
    assert!(listing.files.is_empty());
    assert_eq!(listing.messages, ["Deleted funny_cat.gif."]);
    let listing = tracker.delete(["funny_cat.gif"]).await?;
    assert!(matches!(listing.errors.as_slice(), [Error::FileNotFound(_)]));
    assert_eq!(read_log(&root).await, json!({}));

    Ok(())
}

#[tokio::test]
async fn test_legacy_documents() -> anyhow::Result<()> {
    let root = TempDir::new()?;
    let config = TrackerConfig::in_dir(root.path());
    fs::create_dir(config.storage_dir()).await?;
    fs::write(config.storage_dir().join("a.jpg"), b"a").await?;
    fs::write(config.storage_dir().join("b.png"), b"b").await?;
    fs::write(
        root.path().join("settings.json"),
        r#"{ "interval": "8", "expire_days": 30 }"#,
    )
    .await?;
    fs::write(
        root.path().join("image_log.json"),
        json!({
            "a.jpg": { "first_seen": epoch_days_ago(1) },
            "b.png": { "first_seen": epoch_days_ago(10).to_string() },
            "gone.webp": { "first_seen": "2020-01-01T00:00:00+00:00" },
        })
        .to_string(),
    )
    .await?;
    let tracker = Tracker::open(config);

    let listing = tracker.files().await?;

    assert_eq!(listing.settings, Settings::new(8, 30));
    let names: Vec<_> = listing.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["b.png", "a.jpg"]);
    assert_eq!(listing.files[0].days_left, 20);
    assert_eq!(listing.files[1].days_left, 29);
    let log = read_log(&root).await;
    assert!(log.get("gone.webp").is_none());
    assert!(log["a.jpg"]["firstSeen"].is_string());

    Ok(())
}

#[tokio::test]
async fn test_missing_storage_directory() -> anyhow::Result<()> {
    let root = TempDir::new()?;
    let tracker = Tracker::open(TrackerConfig::in_dir(root.path()));

    let err = tracker.gallery().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(!root.path().join("image_log.json").exists());

    Ok(())
}

#[tokio::test]
async fn test_out_of_range_documents() -> anyhow::Result<()> {
    let root = TempDir::new()?;
    let config = TrackerConfig::in_dir(root.path());
    fs::create_dir(config.storage_dir()).await?;
    fs::write(config.storage_dir().join("a.jpg"), b"a").await?;
    fs::write(
        root.path().join("settings.json"),
        r#"{ "retentionDays": 100000000 }"#,
    )
    .await?;
    let tracker = Tracker::open(config);

    let listing = tracker.files().await?;
    assert_eq!(listing.settings.retention_days, 3650);
    assert_eq!(listing.files.len(), 1);
    assert_eq!(listing.files[0].days_left, 3650);

    // Expiry of this timestamp lies past the last representable date
    fs::write(
        root.path().join("image_log.json"),
        json!({ "a.jpg": { "firstSeen": 8_210_266_800_000_i64 } }).to_string(),
    )
    .await?;

    let gallery = tracker.gallery().await?;
    assert_eq!(gallery.images.len(), 1);
    assert!(!gallery.images[0].expired);
    let log = read_log(&root).await;
    let first_seen = log["a.jpg"]["firstSeen"].as_str().unwrap();
    let first_seen = DateTime::parse_from_rfc3339(first_seen)?;
    assert!(first_seen.to_utc() <= Utc::now());

    Ok(())
}
