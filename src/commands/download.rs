use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};

use tunefetch_core::models::settings::AppSettings;
use tunefetch_core::platforms::traits::{StreamProvider, Transcoder};
use tunefetch_core::{BatchResult, BatchRunner, Summary};

use crate::core::direct_downloader::http_client;
use crate::core::events::ConsoleRenderer;
use crate::core::ffmpeg::{find_ffmpeg, FfmpegTranscoder};
use crate::core::process;
use crate::core::ytdlp::{ensure_ytdlp, YtDlpProvider};

const RULE_WIDTH: usize = 50;

/// Locates yt-dlp (installing it when missing) and ffmpeg. Audio-only runs
/// refuse to start without ffmpeg.
pub async fn prepare_collaborators(
    settings: &AppSettings,
) -> anyhow::Result<(Arc<dyn StreamProvider>, Arc<dyn Transcoder>)> {
    let client = http_client()?;
    let ytdlp = ensure_ytdlp(&client).await.context("yt-dlp is required")?;
    tracing::info!("using yt-dlp at {}", ytdlp.display());

    let ffmpeg = match find_ffmpeg().await {
        Some(path) => path,
        None if settings.download.audio_only => {
            bail!("ffmpeg is required for audio-only downloads but was not found on PATH")
        }
        None => {
            tracing::warn!("ffmpeg not found, yt-dlp may be unable to merge video and audio");
            PathBuf::from(process::bin_name("ffmpeg"))
        }
    };

    let provider = YtDlpProvider::new(ytdlp, settings.download.video_format.clone(), client);
    let transcoder = FfmpegTranscoder::new(ffmpeg, settings.download.audio_format.clone());
    Ok((Arc::new(provider), Arc::new(transcoder)))
}

/// Runs everything the settings ask for. The first Ctrl-C stops dispatching
/// new items; a second one exits immediately.
pub async fn download_all(settings: Arc<AppSettings>) -> anyhow::Result<BatchResult> {
    let (provider, transcoder) = prepare_collaborators(&settings).await?;

    let renderer = Arc::new(ConsoleRenderer::new());
    let runner = BatchRunner::new(provider, transcoder, settings).with_renderer(renderer.clone());

    let cancel = runner.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        renderer.suspend(|| {
            eprintln!("Interrupted: finishing running downloads, press Ctrl-C again to abort");
        });
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let result = runner.run().await;
    interrupt.abort();
    Ok(result)
}

pub fn config_info(settings: &AppSettings) -> String {
    let download = &settings.download;
    let mode = if download.collection_mode {
        format!("Collections ({})", settings.sources.collections.len())
    } else {
        format!("Single items ({})", settings.sources.items.len())
    };
    let format = if download.audio_only {
        format!("Audio only ({})", download.audio_format)
    } else {
        format!("Video ({})", download.video_format)
    };

    [
        format!("> Parallel downloads: {}", settings.advanced.parallelism),
        format!("> Mode: {}", mode),
        format!("> Format: {}", format),
        format!("> Download path: {}", download.download_dir.display()),
        "-".repeat(RULE_WIDTH),
    ]
    .join("\n")
}

pub fn format_summary(summary: &Summary) -> String {
    let mut lines = vec![
        "=".repeat(RULE_WIDTH),
        format!(
            "Download summary ({})",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ),
        "-".repeat(RULE_WIDTH),
        format!("Successful: {}", summary.success_count),
        format!("Skipped:    {}", summary.skipped_count),
        format!("Failed:     {}", summary.failure_count),
    ];

    if !summary.failures.is_empty() {
        lines.push(String::new());
        lines.push("Failed downloads:".to_string());
        for failure in &summary.failures {
            lines.push(format!(
                "* {} ({} attempt{})",
                failure.identifier,
                failure.attempts,
                if failure.attempts == 1 { "" } else { "s" }
            ));
            lines.push(format!("  {}", failure.message));
        }
    }

    if !summary.collection_errors.is_empty() {
        lines.push(String::new());
        lines.push("Collections that could not be loaded:".to_string());
        for error in &summary.collection_errors {
            lines.push(format!("* {}", error.identifier));
            lines.push(format!("  {}", error.message));
        }
    }

    lines.push("=".repeat(RULE_WIDTH));
    lines.join("\n")
}

pub fn exit_code(result: &BatchResult) -> i32 {
    if result.has_failures() {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunefetch_core::core::error::ErrorKind;
    use tunefetch_core::core::results::{ItemOutcome, ItemRecord, ResultCollector};

    fn succeeded(path: &str) -> ItemOutcome {
        ItemOutcome::Succeeded { path: path.into() }
    }

    fn sample() -> BatchResult {
        let mut collector = ResultCollector::new();
        collector.record(ItemRecord::new(0, "https://youtu.be/a", succeeded("a.mp3"), 1));
        collector.record(ItemRecord::new(
            1,
            "https://youtu.be/b",
            ItemOutcome::Failed {
                kind: ErrorKind::Transient,
                message: "HTTP Error 503".into(),
            },
            10,
        ));
        collector.collection_failed("list=gone", "The playlist does not exist");
        collector.finish()
    }

    #[test]
    fn summary_lists_failures_with_attempts() {
        let text = format_summary(&sample().summary());
        assert!(text.contains("Successful: 1"));
        assert!(text.contains("Failed:     1"));
        assert!(text.contains("* https://youtu.be/b (10 attempts)\n  HTTP Error 503"));
        assert!(text.contains("* list=gone\n  The playlist does not exist"));
    }

    #[test]
    fn clean_summary_has_no_failure_section() {
        let mut collector = ResultCollector::new();
        collector.record(ItemRecord::new(0, "x", succeeded("x.mp3"), 1));
        let result = collector.finish();
        let text = format_summary(&result.summary());
        assert!(!text.contains("Failed downloads"));
        assert_eq!(exit_code(&result), 0);
    }

    #[test]
    fn failures_set_exit_code() {
        assert_eq!(exit_code(&sample()), 1);
    }

    #[test]
    fn config_info_describes_mode() {
        let mut settings = AppSettings::default();
        settings.download.collection_mode = true;
        settings.sources.collections = vec!["list=a".into(), "list=b".into()];
        let text = config_info(&settings);
        assert!(text.contains("> Mode: Collections (2)"));
        assert!(text.contains("> Format: Audio only (mp3)"));
        assert!(text.contains("> Parallel downloads: 5"));
    }
}
