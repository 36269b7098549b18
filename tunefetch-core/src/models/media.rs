use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    AudioOnly,
    HighestQuality,
}

impl OutputKind {
    pub fn from_audio_only(audio_only: bool) -> Self {
        if audio_only {
            OutputKind::AudioOnly
        } else {
            OutputKind::HighestQuality
        }
    }
}

/// One unit of work. Built once by the orchestrator and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub identifier: String,
    pub index: usize,
    pub output: OutputKind,
    pub destination: PathBuf,
}

impl Item {
    pub fn new(
        identifier: impl Into<String>,
        index: usize,
        output: OutputKind,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            index,
            output,
            destination: destination.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    pub author: Option<String>,
    pub duration_seconds: Option<f64>,
    pub thumbnail: Option<String>,
    pub has_audio: bool,
    pub has_video: bool,
}

impl MediaInfo {
    /// Whether the item has the streams `output` needs. A highest quality
    /// download takes whatever exists; audio only needs an audio track.
    pub fn offers(&self, output: OutputKind) -> bool {
        match output {
            OutputKind::AudioOnly => self.has_audio,
            OutputKind::HighestQuality => self.has_audio || self.has_video,
        }
    }

    /// `Artist, 3:25` style description for logs.
    pub fn describe(&self) -> String {
        let author = self.author.as_deref().unwrap_or("unknown uploader");
        match self.duration_seconds {
            Some(secs) if secs.is_finite() && secs >= 0.0 => {
                let secs = secs.round() as u64;
                format!("{}, {}:{:02}", author, secs / 60, secs % 60)
            }
            _ => author.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub title: String,
    pub entries: Vec<String>,
}
