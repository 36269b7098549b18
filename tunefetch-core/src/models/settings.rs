use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::filename;
use crate::fs_paths::{AppPaths, DesktopPaths};
use crate::models::media::OutputKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub advanced: AdvancedSettings,
    #[serde(default)]
    pub sources: SourceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default)]
    pub collection_mode: bool,
    #[serde(default = "default_true")]
    pub audio_only: bool,
    #[serde(default = "default_max_filename_length")]
    pub max_filename_length: usize,
    #[serde(default = "default_truncation_marker")]
    pub truncation_marker: String,
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
    #[serde(default = "default_video_format")]
    pub video_format: String,
    /// Audio downloads also save the item's thumbnail under `thumbnails/`.
    #[serde(default)]
    pub save_thumbnails: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedSettings {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_true")]
    pub retry_unavailable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceSettings {
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub collections: Vec<String>,
}

/// Newest settings layout this build understands.
pub const SCHEMA_VERSION: u32 = 2;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn default_download_dir() -> PathBuf {
    DesktopPaths.downloads_dir()
}

fn default_true() -> bool {
    true
}

fn default_max_filename_length() -> usize {
    85
}

pub fn default_truncation_marker() -> String {
    "...".into()
}

fn default_audio_format() -> String {
    "mp3".into()
}

fn default_video_format() -> String {
    "mp4".into()
}

fn default_parallelism() -> usize {
    5
}

fn default_max_retry_attempts() -> u32 {
    10
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            collection_mode: false,
            audio_only: true,
            max_filename_length: default_max_filename_length(),
            truncation_marker: default_truncation_marker(),
            audio_format: default_audio_format(),
            video_format: default_video_format(),
            save_thumbnails: false,
        }
    }
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_unavailable: true,
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            download: DownloadSettings::default(),
            advanced: AdvancedSettings::default(),
            sources: SourceSettings::default(),
        }
    }
}

/// Shortest name budget that still leaves a one byte stem next to the
/// longest extension the sanitizer recognizes and the truncation marker.
const MIN_NAME_BUDGET: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("settings schema_version {0} is newer than this build supports ({max})", max = SCHEMA_VERSION)]
    NewerSchema(u32),
    #[error("advanced.parallelism must be at least 1")]
    ZeroParallelism,
    #[error("advanced.max_retry_attempts must be at least 1")]
    ZeroAttempts,
    #[error("download.max_filename_length must be at least {min} bytes, got {got}")]
    NameBudgetTooSmall { min: usize, got: usize },
    #[error(
        "download.truncation_marker {0:?} contains characters that are not allowed in file names"
    )]
    UnsafeMarker(String),
    #[error("output format {0:?} is not a plain file extension")]
    BadFormat(String),
}

impl AppSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.schema_version > SCHEMA_VERSION {
            return Err(SettingsError::NewerSchema(self.schema_version));
        }
        if self.advanced.parallelism == 0 {
            return Err(SettingsError::ZeroParallelism);
        }
        if self.advanced.max_retry_attempts == 0 {
            return Err(SettingsError::ZeroAttempts);
        }

        let min = MIN_NAME_BUDGET.max(self.download.truncation_marker.len() + 8);
        if self.download.max_filename_length < min {
            return Err(SettingsError::NameBudgetTooSmall {
                min,
                got: self.download.max_filename_length,
            });
        }

        let marker = &self.download.truncation_marker;
        if !filename::is_clean(marker) {
            return Err(SettingsError::UnsafeMarker(marker.clone()));
        }

        for fmt in [&self.download.audio_format, &self.download.video_format] {
            if !filename::is_extension(fmt) {
                return Err(SettingsError::BadFormat(fmt.clone()));
            }
        }

        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.advanced.retry_delay_ms)
    }

    /// Extension (without the dot) of the final file for the given output kind.
    pub fn extension_for(&self, output: OutputKind) -> &str {
        match output {
            OutputKind::AudioOnly => &self.download.audio_format,
            OutputKind::HighestQuality => &self.download.video_format,
        }
    }
}
