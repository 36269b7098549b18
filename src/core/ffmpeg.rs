use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

use tunefetch_core::core::error::TranscodeError;
use tunefetch_core::platforms::traits::Transcoder;

use crate::core::process;

pub async fn find_ffmpeg() -> Option<PathBuf> {
    let name = process::bin_name("ffmpeg");
    let available = process::command(&name)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false);
    if available {
        return Some(PathBuf::from(name));
    }

    let managed = process::managed_bin_dir()?.join(&name);
    managed.exists().then_some(managed)
}

fn codec_args(audio_format: &str) -> Vec<&'static str> {
    match audio_format {
        "mp3" => vec!["-codec:a", "libmp3lame", "-q:a", "2"],
        "m4a" | "aac" => vec!["-codec:a", "aac", "-b:a", "192k"],
        "opus" => vec!["-codec:a", "libopus", "-b:a", "160k"],
        "flac" => vec!["-codec:a", "flac"],
        _ => Vec::new(),
    }
}

/// Transcoder that shells out to ffmpeg. The output container follows the
/// output file's extension.
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    audio_format: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: PathBuf, audio_format: impl Into<String>) -> Self {
        Self {
            ffmpeg,
            audio_format: audio_format.into(),
        }
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vn".to_string(),
        ];
        args.extend(codec_args(&self.audio_format).into_iter().map(String::from));
        args.push(output.to_string_lossy().to_string());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        let result = process::command(&self.ffmpeg)
            .args(self.args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        let failure = match result {
            Ok(out) if out.status.success() => return Ok(()),
            Ok(out) => format!(
                "ffmpeg exited with {}: {}",
                out.status,
                process::stderr_tail(&out.stderr)
            ),
            Err(e) => format!("Failed to run ffmpeg: {}", e),
        };

        if let Err(e) = tokio::fs::remove_file(output).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("could not remove partial {}: {}", output.display(), e);
            }
        }
        Err(TranscodeError(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mp3_uses_lame_vbr() {
        let t = FfmpegTranscoder::new("ffmpeg".into(), "mp3");
        let args = t.args(Path::new("/tmp/in_temp"), Path::new("/tmp/in_temp.mp3"));
        assert_eq!(
            args,
            [
                "-hide_banner",
                "-loglevel",
                "error",
                "-y",
                "-i",
                "/tmp/in_temp",
                "-vn",
                "-codec:a",
                "libmp3lame",
                "-q:a",
                "2",
                "/tmp/in_temp.mp3"
            ]
        );
    }

    #[test]
    fn unknown_format_lets_ffmpeg_pick_the_codec() {
        let t = FfmpegTranscoder::new("ffmpeg".into(), "wav");
        let args = t.args(Path::new("in"), Path::new("out.wav"));
        assert_eq!(args[args.len() - 2..], ["-vn", "out.wav"]);
    }

    #[tokio::test]
    async fn missing_binary_is_a_transcode_error() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in_temp");
        std::fs::write(&input, b"raw").unwrap();
        let output = tmp.path().join("in_temp.mp3");

        let t = FfmpegTranscoder::new(tmp.path().join("no-such-ffmpeg"), "mp3");
        let err = t.transcode(&input, &output).await.unwrap_err();
        assert!(err.0.contains("Failed to run ffmpeg"));
        assert!(input.exists());
        assert!(!output.exists());
    }
}
