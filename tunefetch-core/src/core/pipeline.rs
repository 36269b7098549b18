use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::error::DownloadError;
use crate::core::filename::{sanitize, split_extension};
use crate::core::paths::{DirectoryLocks, NameClaim};
use crate::core::progress::{ItemProgress, Phase, ProgressThrottle};
use crate::models::media::{Item, MediaInfo, OutputKind};
use crate::models::settings::AppSettings;
use crate::platforms::traits::{StreamProvider, Transcoder};

const TEMP_SUFFIX: &str = "_temp";

const PROGRESS_INTERVAL_MS: u64 = 150;

const THUMBNAIL_DIR: &str = "thumbnails";

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// A finished file already existed at the final name.
    Skipped(PathBuf),
    Downloaded(PathBuf),
}

/// Rejects identifiers that can never succeed, before any retry budget is
/// spent. Bare video ids are accepted; anything with a scheme must parse.
pub fn validate_identifier(identifier: &str) -> Result<(), DownloadError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(DownloadError::InvalidItem("empty identifier".into()));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(DownloadError::InvalidItem(format!(
            "identifier contains whitespace: {}",
            identifier
        )));
    }
    if trimmed.contains("://") {
        url::Url::parse(trimmed)
            .map_err(|e| DownloadError::InvalidItem(format!("{}: {}", identifier, e)))?;
    }
    Ok(())
}

/// Image extension taken from the thumbnail URL's path, `jpg` when it has none.
fn thumbnail_extension(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            let (_, ext) = split_extension(u.path().rsplit('/').next().unwrap_or(""));
            let ext = ext.trim_start_matches('.').to_ascii_lowercase();
            matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "webp").then_some(ext)
        })
        .unwrap_or_else(|| "jpg".to_string())
}

/// Temporary names and paths derived from the reserved final name.
struct Staging {
    raw_name: String,
    staged_name: String,
    staged: PathBuf,
    target: PathBuf,
}

impl Staging {
    fn new(dir: &Path, final_name: &str) -> Self {
        let (stem, ext) = split_extension(final_name);
        let raw_name = format!("{}{}", stem, TEMP_SUFFIX);
        let staged_name = format!("{}{}{}", stem, TEMP_SUFFIX, ext);
        Self {
            staged: dir.join(&staged_name),
            target: dir.join(final_name),
            raw_name,
            staged_name,
        }
    }
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn discard(path: &Path) {
    if let Err(e) = remove_if_present(path).await {
        tracing::warn!("failed to remove {}: {}", path.display(), e);
    }
}

/// Removes `<stem>_temp` and every `<stem>_temp.*` in `dir`, whatever
/// extension the provider chose.
async fn sweep_temp(dir: &Path, raw_name: &str) -> Result<(), DownloadError> {
    let prefix = format!("{}.", raw_name);
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(DownloadError::filesystem(dir, e)),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DownloadError::filesystem(dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == raw_name || name.starts_with(&prefix) {
            let path = entry.path();
            remove_if_present(&path)
                .await
                .map_err(|e| DownloadError::filesystem(&path, e))?;
        }
    }
    Ok(())
}

async fn discard_temp(dir: &Path, raw_name: &str) {
    if let Err(e) = sweep_temp(dir, raw_name).await {
        tracing::warn!("failed to clean up {} in {}: {}", raw_name, dir.display(), e);
    }
}

async fn require_file(path: &Path) -> Result<(), DownloadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(DownloadError::MissingOutput(path.to_path_buf())),
    }
}

/// Runs `download` with a progress channel whose updates are throttled into
/// `progress`. Returns once every forwarded update has been reported.
async fn track_download<F, Fut>(progress: &ItemProgress, title: &str, download: F) -> Fut::Output
where
    F: FnOnce(mpsc::Sender<f64>) -> Fut,
    Fut: Future,
{
    let (tx, mut rx) = mpsc::channel::<f64>(32);
    let forward_progress = progress.clone();
    let title = title.to_string();
    let progress_forwarder = tokio::spawn(async move {
        let mut throttle = ProgressThrottle::new(PROGRESS_INTERVAL_MS);
        while let Some(percent) = rx.recv().await {
            if !throttle.should_emit() && percent < 100.0 {
                continue;
            }
            forward_progress.report(
                Phase::Running(percent / 100.0),
                format!("Downloading: {} {:.0}%", title, percent),
            );
        }
    });

    let output = download(tx).await;
    let _ = progress_forwarder.await;
    output
}

/// Downloads one item to a temporary name and moves it into place only
/// after every step succeeded. A final file is either complete or absent.
pub struct FetchTranscodePipeline {
    provider: Arc<dyn StreamProvider>,
    transcoder: Arc<dyn Transcoder>,
    locks: DirectoryLocks,
    settings: Arc<AppSettings>,
}

impl FetchTranscodePipeline {
    pub fn new(
        provider: Arc<dyn StreamProvider>,
        transcoder: Arc<dyn Transcoder>,
        locks: DirectoryLocks,
        settings: Arc<AppSettings>,
    ) -> Self {
        Self {
            provider,
            transcoder,
            locks,
            settings,
        }
    }

    fn provider_error(&self, e: crate::core::error::ProviderError) -> DownloadError {
        DownloadError::provider(e, self.settings.advanced.retry_unavailable)
    }

    pub async fn run(
        &self,
        item: &Item,
        progress: &ItemProgress,
    ) -> Result<PipelineOutcome, DownloadError> {
        let info = self
            .provider
            .fetch_info(&item.identifier)
            .await
            .map_err(|e| self.provider_error(e))?;

        if !info.offers(item.output) {
            let wanted = match item.output {
                OutputKind::AudioOnly => "audio",
                OutputKind::HighestQuality => "audio or video",
            };
            return Err(DownloadError::NoStream(wanted));
        }

        let download = &self.settings.download;
        let ext = self.settings.extension_for(item.output);
        let desired = sanitize(
            &format!("{}.{}", info.title, ext),
            download.max_filename_length,
            &download.truncation_marker,
        );

        tokio::fs::create_dir_all(&item.destination)
            .await
            .map_err(|e| DownloadError::filesystem(&item.destination, e))?;

        let reservation = match self.locks.claim(&item.destination, &desired) {
            NameClaim::Existing(path) => {
                tracing::debug!("[{}] {} already exists", item.index, path.display());
                return Ok(PipelineOutcome::Skipped(path));
            }
            NameClaim::Reserved(r) => r,
        };

        let staging = Staging::new(&item.destination, reservation.name());
        sweep_temp(&item.destination, &staging.raw_name).await?;

        progress.report(Phase::Started, format!("Downloading: {}", info.title));
        tracing::debug!(
            "[{}] {} -> {}",
            item.index,
            item.identifier,
            staging.target.display()
        );

        let result = match item.output {
            OutputKind::AudioOnly => self.fetch_audio(item, &staging, progress, &info.title).await,
            OutputKind::HighestQuality => {
                self.fetch_video(item, &staging, progress, &info.title).await
            }
        };

        result?;
        if download.save_thumbnails && item.output == OutputKind::AudioOnly {
            let (stem, _) = split_extension(reservation.name());
            self.save_thumbnail(item, &info, stem).await;
        }
        reservation.commit();
        Ok(PipelineOutcome::Downloaded(staging.target))
    }

    /// Best effort: a missing or broken thumbnail never fails the item.
    async fn save_thumbnail(&self, item: &Item, info: &MediaInfo, stem: &str) {
        tracing::info!("[{}] {} ({})", item.index, info.title, info.describe());
        let Some(url) = info.thumbnail.as_deref() else {
            tracing::debug!("[{}] no thumbnail offered", item.index);
            return;
        };

        let dir = item.destination.join(THUMBNAIL_DIR);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!("failed to create {}: {}", dir.display(), e);
            return;
        }
        let dest = dir.join(format!("{}.{}", stem, thumbnail_extension(url)));
        match self.provider.save_thumbnail(url, &dest).await {
            Ok(()) => tracing::info!("[{}] thumbnail saved: {}", item.index, dest.display()),
            Err(e) => tracing::warn!("[{}] thumbnail not saved: {}", item.index, e),
        }
    }

    async fn fetch_audio(
        &self,
        item: &Item,
        staging: &Staging,
        progress: &ItemProgress,
        title: &str,
    ) -> Result<(), DownloadError> {
        let download = track_download(progress, title, |tx| {
            self.provider
                .download_audio_only(&item.identifier, &item.destination, &staging.raw_name, tx)
        });
        let downloaded = match download.await {
            Ok(path) => path,
            Err(e) => {
                discard_temp(&item.destination, &staging.raw_name).await;
                return Err(self.provider_error(e));
            }
        };
        require_file(&downloaded).await?;

        progress.report(Phase::Running(1.0), format!("Converting: {}", title));

        if let Err(e) = self.transcoder.transcode(&downloaded, &staging.staged).await {
            // raw download stays for inspection
            discard(&staging.staged).await;
            return Err(e.into());
        }
        require_file(&staging.staged).await?;

        tokio::fs::rename(&staging.staged, &staging.target)
            .await
            .map_err(|e| DownloadError::filesystem(&staging.target, e))?;

        if let Err(e) = remove_if_present(&downloaded).await {
            discard(&staging.target).await;
            return Err(DownloadError::filesystem(&downloaded, e));
        }
        Ok(())
    }

    async fn fetch_video(
        &self,
        item: &Item,
        staging: &Staging,
        progress: &ItemProgress,
        title: &str,
    ) -> Result<(), DownloadError> {
        let download = track_download(progress, title, |tx| {
            self.provider.download_highest_quality(
                &item.identifier,
                &item.destination,
                &staging.staged_name,
                tx,
            )
        });
        let downloaded = match download.await {
            Ok(path) => path,
            Err(e) => {
                discard_temp(&item.destination, &staging.raw_name).await;
                return Err(self.provider_error(e));
            }
        };
        require_file(&downloaded).await?;

        tokio::fs::rename(&downloaded, &staging.target)
            .await
            .map_err(|e| DownloadError::filesystem(&staging.target, e))?;
        Ok(())
    }
}
