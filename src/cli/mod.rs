use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use directories::ProjectDirs;
use serde::Serialize;
use tokio::fs;

use memer::errors::Error;
use memer::settings::Settings;
use memer::{DateTime, ImageFile, Tracker, TrackerConfig, Utc};

/// Default data path.
fn default_data_path() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "memer") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from(".memer")
    }
}

/// Calculate default storage directory path based on OS.
fn default_storage_directory() -> PathBuf {
    default_data_path().join("uploads")
}

/// Calculate default retention log path based on OS.
fn default_log_path() -> PathBuf {
    default_data_path().join("image_log.json")
}

/// Calculate default settings path based on OS.
fn default_settings_path() -> PathBuf {
    default_data_path().join("settings.json")
}

/// CLI interface of Memer.
#[derive(Parser, Clone, Debug)]
#[command(version, about = "Memer image lifecycle tracker")]
pub struct Cli {
    /// Path to storage directory.
    ///
    /// This is the directory holding uploaded images.
    #[arg(
        short = 'd',
        long,
        value_name = "PATH",
        default_value = default_storage_directory().into_os_string(),
    )]
    dir: PathBuf,

    /// Path to retention log file.
    ///
    /// It is not allowed to put the log into storage directory.
    #[arg(
        short = 'l',
        long,
        value_name = "PATH",
        default_value = default_log_path().into_os_string(),
    )]
    log: PathBuf,

    /// Path to settings file.
    #[arg(
        short = 's',
        long,
        value_name = "PATH",
        default_value = default_settings_path().into_os_string(),
    )]
    settings: PathBuf,

    /// Print output as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Command to execute.
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    pub async fn execute(&self) -> anyhow::Result<()> {
        // Ensure documents have their parent directory
        for path in [&self.log, &self.settings] {
            if let Some(parent_dir) = path.parent() {
                fs::create_dir_all(parent_dir)
                    .await
                    .with_context(|| format!("failed to create '{}'", parent_dir.display()))?;
            }
        }
        if self.log.starts_with(&self.dir) {
            anyhow::bail!("retention log must not be placed into storage directory");
        }

        let config = TrackerConfig::builder()
            .storage_dir(&self.dir)
            .log_path(&self.log)
            .settings_path(&self.settings)
            .build()
            .context("failed to configure tracker")?;
        let tracker = Tracker::open(config);

        self.command.execute(&tracker, self.json).await
    }
}

/// Memer commands.
#[derive(Clone, Debug, clap::Subcommand)]
pub enum Command {
    /// Show slideshow images.
    ///
    /// Expired images are deleted.
    Gallery,

    /// List stored files.
    ///
    /// Expired files are kept and marked.
    Files,

    /// Delete files from storage.
    Delete {
        /// File names to delete.
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Place a local image into storage.
    Upload {
        /// Path to the image.
        path: PathBuf,

        /// Name to store the image under. Defaults to the file name of `path`.
        #[arg(long)]
        name: Option<String>,
    },

    /// Manage settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
}

impl Command {
    pub async fn execute(&self, tracker: &Tracker, json: bool) -> anyhow::Result<()> {
        match self {
            Self::Gallery => {
                let gallery = tracker.gallery().await.context("failed to show gallery")?;
                report_errors(&gallery.errors);
                if json {
                    print_json(&GalleryView {
                        interval_seconds: gallery.settings.interval_seconds,
                        images: gallery.images.iter().map(ImageView::from).collect(),
                        errors: messages(&gallery.errors),
                    })?;
                } else {
                    println!("Interval: {}s", gallery.settings.interval_seconds);
                    print_files(&gallery.images);
                }
            }
            Self::Files => {
                let listing = tracker.files().await.context("failed to list files")?;
                print_listing(listing, json)?;
            }
            Self::Delete { names } => {
                let listing = tracker
                    .delete(names)
                    .await
                    .context("failed to delete files")?;
                print_listing(listing, json)?;
            }
            Self::Upload { path, name } => {
                let original_name = match name {
                    Some(name) => name.clone(),
                    None => path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .context("upload path has no UTF-8 file name")?
                        .to_string(),
                };
                let stored = tracker
                    .upload(&original_name, path)
                    .await
                    .context("failed to upload image")?;
                println!("Image uploaded successfully: {}", stored);
            }
            Self::Settings(cmd) => {
                cmd.execute(tracker, json).await?;
            }
        }
        Ok(())
    }
}

/// Settings subcommand.
#[derive(Clone, Debug, clap::Subcommand)]
pub enum SettingsCommand {
    /// Show current settings.
    Show,

    /// Update settings.
    ///
    /// Interval is clamped to 1..=3600 seconds, retention to 1..=3650 days.
    Set {
        /// Slideshow interval in seconds.
        #[arg(long, allow_negative_numbers = true)]
        interval: i64,

        /// Days files are kept after being first seen.
        #[arg(long, allow_negative_numbers = true)]
        retention_days: i64,
    },
}

impl SettingsCommand {
    pub async fn execute(&self, tracker: &Tracker, json: bool) -> anyhow::Result<()> {
        let settings = match self {
            Self::Show => tracker.settings().await,
            Self::Set {
                interval,
                retention_days,
            } => {
                let settings = tracker
                    .update_settings(Settings::new(saturate(*interval), saturate(*retention_days)))
                    .await
                    .context("unable to save settings")?;
                eprintln!(
                    "Settings updated. Interval: {}s, expires after {} days.",
                    settings.interval_seconds, settings.retention_days
                );
                settings
            }
        };
        if json {
            print_json(&settings)?;
        } else {
            println!("{}", settings);
        }
        Ok(())
    }
}

fn saturate(value: i64) -> u32 {
    value.clamp(0, u32::MAX.into()) as u32
}

/// Serializable mirror of [`memer::Gallery`].
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GalleryView<'a> {
    interval_seconds: u32,
    images: Vec<ImageView<'a>>,
    errors: Vec<String>,
}

/// Serializable mirror of [`memer::FileListing`].
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ListingView<'a> {
    retention_days: u32,
    files: Vec<ImageView<'a>>,
    messages: &'a [String],
    errors: Vec<String>,
}

/// Serializable mirror of [`memer::ImageFile`].
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ImageView<'a> {
    #[serde(flatten)]
    file: &'a ImageFile,
    url: String,
    size_label: String,
}

impl<'a> From<&'a ImageFile> for ImageView<'a> {
    fn from(file: &'a ImageFile) -> Self {
        Self {
            file,
            url: file.url_path(),
            size_label: file.size_label(),
        }
    }
}

fn print_listing(listing: memer::FileListing, json: bool) -> anyhow::Result<()> {
    report_errors(&listing.errors);
    if json {
        return print_json(&ListingView {
            retention_days: listing.settings.retention_days,
            files: listing.files.iter().map(ImageView::from).collect(),
            messages: &listing.messages,
            errors: messages(&listing.errors),
        });
    }
    for message in &listing.messages {
        println!("{}", message);
    }
    println!(
        "Images stay live for {} day(s).",
        listing.settings.retention_days
    );
    print_files(&listing.files);
    Ok(())
}

fn print_files(files: &[ImageFile]) {
    if files.is_empty() {
        println!("No uploaded files were found.");
    }
    for file in files {
        println!(
            "{}\t{} day{} left\texpires {}\tfirst seen {}\t{}{}",
            file.name,
            file.days_left,
            if file.days_left == 1 { "" } else { "s" },
            short_date(file.expires_at),
            short_date(file.first_seen),
            file.size_label(),
            if file.expired { "\texpired" } else { "" },
        );
    }
}

fn short_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%b %-d, %Y").to_string()
}

fn messages(errors: &[Error]) -> Vec<String> {
    errors.iter().map(Error::message).collect()
}

fn report_errors(errors: &[Error]) {
    for error in errors {
        eprintln!("error: {}", error.message());
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
