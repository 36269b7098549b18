use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::anyhow;
use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;

use tunefetch_core::core::error::ProviderError;
use tunefetch_core::models::media::{Collection, MediaInfo};
use tunefetch_core::platforms::traits::StreamProvider;

use crate::core::direct_downloader::download_direct;
use crate::core::process;

static UNAVAILABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)private video|video unavailable|has been removed|is not available",
        r"|no longer available|members-only|copyright claim",
        r"|account associated with this video has been terminated",
    ))
    .unwrap()
});

pub async fn find_ytdlp() -> Option<PathBuf> {
    let name = process::bin_name("yt-dlp");

    if let Ok(status) = process::command(&name)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        if status.success() {
            return Some(PathBuf::from(name));
        }
    }

    let managed = managed_ytdlp_path()?;
    if managed.exists() {
        return Some(managed);
    }

    None
}

fn managed_ytdlp_path() -> Option<PathBuf> {
    Some(process::managed_bin_dir()?.join(process::bin_name("yt-dlp")))
}

pub async fn ensure_ytdlp(client: &reqwest::Client) -> anyhow::Result<PathBuf> {
    if let Some(path) = find_ytdlp().await {
        return Ok(path);
    }

    tracing::info!("yt-dlp not found, downloading release binary");
    download_ytdlp_binary(client).await
}

async fn download_ytdlp_binary(client: &reqwest::Client) -> anyhow::Result<PathBuf> {
    let target =
        managed_ytdlp_path().ok_or_else(|| anyhow!("Could not determine data directory"))?;

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let download_url = if cfg!(target_os = "windows") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_macos"
    } else {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp"
    };

    let bytes = download_direct(client, download_url, &target)
        .await
        .map_err(|e| anyhow!("Failed to download yt-dlp: {:#}", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        tokio::fs::set_permissions(&target, perms).await?;
    }

    tracing::info!("installed yt-dlp at {} ({} bytes)", target.display(), bytes);
    Ok(target)
}

/// Turns yt-dlp's stderr into a provider error, flagging content that will
/// never download.
fn classify_failure(stderr: &[u8]) -> ProviderError {
    let tail = process::stderr_tail(stderr);
    let message = tail
        .lines()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .map(|l| l.trim_start_matches("ERROR:").trim().to_string())
        .unwrap_or_else(|| {
            if tail.is_empty() {
                "yt-dlp exited without output".to_string()
            } else {
                tail.clone()
            }
        });

    if UNAVAILABLE_RE.is_match(&message) {
        ProviderError::unavailable(message)
    } else {
        ProviderError::new(message)
    }
}

fn parse_progress_line(line: &str) -> Option<f64> {
    let line = line.trim();
    let pct_str = if let Some(rest) = line.strip_prefix("download:") {
        rest.trim().trim_end_matches('%')
    } else if line.ends_with('%') {
        line.trim_end_matches('%').split_whitespace().last()?
    } else {
        return None;
    };

    pct_str.trim().parse::<f64>().ok()
}

fn media_info(json: &serde_json::Value) -> Result<MediaInfo, ProviderError> {
    let title = json
        .get("title")
        .and_then(|v| v.as_str())
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ProviderError::new("yt-dlp returned no title"))?
        .to_string();
    let author = json
        .get("uploader")
        .or_else(|| json.get("channel"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let codec_present = |key: &str| {
        json.get(key)
            .and_then(|v| v.as_str())
            .map(|c| c != "none")
            .unwrap_or(true)
    };

    Ok(MediaInfo {
        title,
        author,
        duration_seconds: json.get("duration").and_then(|v| v.as_f64()),
        thumbnail: json
            .get("thumbnail")
            .and_then(|v| v.as_str())
            .filter(|u| u.starts_with("http"))
            .map(|u| u.to_string()),
        has_audio: codec_present("acodec"),
        has_video: codec_present("vcodec"),
    })
}

fn parse_collection(stdout: &str) -> Collection {
    let mut title = String::new();
    let mut entries = Vec::new();

    for line in stdout.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(json) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };

        if title.is_empty() {
            title = json
                .get("playlist_title")
                .or_else(|| json.get("playlist"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
        }

        let id = json.get("id").and_then(|v| v.as_str()).unwrap_or("");
        let url = json
            .get("url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| {
                (!id.is_empty()).then(|| format!("https://www.youtube.com/watch?v={}", id))
            });
        if let Some(url) = url {
            entries.push(url);
        }
    }

    if title.trim().is_empty() {
        title = "playlist".to_string();
    }
    Collection { title, entries }
}

/// Stream provider backed by the yt-dlp executable.
pub struct YtDlpProvider {
    ytdlp: PathBuf,
    video_format: String,
    client: reqwest::Client,
}

impl YtDlpProvider {
    pub fn new(ytdlp: PathBuf, video_format: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            ytdlp,
            video_format: video_format.into(),
            client,
        }
    }

    async fn capture(&self, args: &[&str]) -> Result<Vec<u8>, ProviderError> {
        let output = process::command(&self.ytdlp)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ProviderError::new(format!("Failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            return Err(classify_failure(&output.stderr));
        }
        Ok(output.stdout)
    }

    async fn download(
        &self,
        identifier: &str,
        dir: &Path,
        filename: &str,
        format_args: &[&str],
        progress: mpsc::Sender<f64>,
    ) -> Result<PathBuf, ProviderError> {
        // -o is a template; a literal percent sign must be doubled
        let output_template = dir.join(filename).to_string_lossy().replace('%', "%%");

        let mut args: Vec<&str> = format_args.to_vec();
        args.extend([
            "--no-playlist",
            "--no-part",
            "--no-mtime",
            "--force-overwrites",
            "--newline",
            "--progress-template",
            "download:%(progress._percent_str)s",
            "-o",
            output_template.as_str(),
            identifier,
        ]);

        let mut child = process::command(&self.ytdlp)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProviderError::new(format!("Failed to start yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::new("yt-dlp stdout unavailable"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProviderError::new("yt-dlp stderr unavailable"))?;

        let progress_tx = progress.clone();
        let line_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(pct) = parse_progress_line(&line) {
                    let _ = progress_tx.send(pct).await;
                }
            }
        });
        let stderr_reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let status = child
            .wait()
            .await
            .map_err(|e| ProviderError::new(format!("yt-dlp process failed: {}", e)))?;
        let _ = line_reader.await;
        let stderr = stderr_reader.await.unwrap_or_default();

        if !status.success() {
            return Err(classify_failure(&stderr));
        }

        let _ = progress.send(100.0).await;
        find_downloaded_file(dir, filename).await.ok_or_else(|| {
            ProviderError::new(format!("yt-dlp finished but {} is missing", filename))
        })
    }
}

/// yt-dlp writes exactly `filename` unless it had to append an extension.
async fn find_downloaded_file(dir: &Path, filename: &str) -> Option<PathBuf> {
    let exact = dir.join(filename);
    if tokio::fs::metadata(&exact).await.is_ok() {
        return Some(exact);
    }

    let prefix = format!("{}.", filename);
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && !name.ends_with(".part") && !name.ends_with(".ytdl") {
            return Some(entry.path());
        }
    }
    None
}

#[async_trait]
impl StreamProvider for YtDlpProvider {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn fetch_info(&self, identifier: &str) -> Result<MediaInfo, ProviderError> {
        let stdout = self
            .capture(&["--dump-json", "--no-warnings", "--no-playlist", identifier])
            .await?;
        let json: serde_json::Value = serde_json::from_slice(&stdout)
            .map_err(|e| ProviderError::new(format!("yt-dlp returned invalid JSON: {}", e)))?;
        media_info(&json)
    }

    async fn expand_collection(&self, identifier: &str) -> Result<Collection, ProviderError> {
        let stdout = self
            .capture(&["--flat-playlist", "--dump-json", "--no-warnings", identifier])
            .await?;
        Ok(parse_collection(&String::from_utf8_lossy(&stdout)))
    }

    async fn download_audio_only(
        &self,
        identifier: &str,
        dir: &Path,
        filename: &str,
        progress: mpsc::Sender<f64>,
    ) -> Result<PathBuf, ProviderError> {
        self.download(identifier, dir, filename, &["-f", "ba/b"], progress)
            .await
    }

    async fn download_highest_quality(
        &self,
        identifier: &str,
        dir: &Path,
        filename: &str,
        progress: mpsc::Sender<f64>,
    ) -> Result<PathBuf, ProviderError> {
        let format_args = [
            "-f",
            "bv*+ba/b",
            "--merge-output-format",
            self.video_format.as_str(),
        ];
        self.download(identifier, dir, filename, &format_args, progress)
            .await
    }

    async fn save_thumbnail(&self, url: &str, dest: &Path) -> Result<(), ProviderError> {
        download_direct(&self.client, url, dest)
            .await
            .map(|_| ())
            .map_err(|e| ProviderError::new(format!("{:#}", e)))
    }
}
