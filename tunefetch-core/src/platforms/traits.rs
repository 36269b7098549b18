use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::error::{ProviderError, TranscodeError};
use crate::models::media::{Collection, MediaInfo};

/// Resolves identifiers into metadata and writes media streams to disk.
///
/// Download methods report fractional progress (0.0 to 100.0) on `progress`;
/// a closed receiver is not an error.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_info(&self, identifier: &str) -> Result<MediaInfo, ProviderError>;

    async fn expand_collection(&self, identifier: &str) -> Result<Collection, ProviderError>;

    /// Downloads the best audio-only stream to `dir/filename` and returns the
    /// path actually written.
    async fn download_audio_only(
        &self,
        identifier: &str,
        dir: &Path,
        filename: &str,
        progress: tokio::sync::mpsc::Sender<f64>,
    ) -> Result<PathBuf, ProviderError>;

    /// Downloads the highest quality audio+video rendition to `dir/filename`.
    async fn download_highest_quality(
        &self,
        identifier: &str,
        dir: &Path,
        filename: &str,
        progress: tokio::sync::mpsc::Sender<f64>,
    ) -> Result<PathBuf, ProviderError>;

    /// Fetches the image at `url` (a [`MediaInfo::thumbnail`]) into `dest`.
    async fn save_thumbnail(&self, url: &str, dest: &Path) -> Result<(), ProviderError> {
        let _ = (url, dest);
        Err(ProviderError::new(format!(
            "{} cannot fetch thumbnails",
            self.name()
        )))
    }
}

/// Converts a raw media file into the target audio format.
///
/// Implementations never modify `input`. On failure they may leave a partial
/// `output` behind; the caller removes it.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError>;
}
