// Common data models for the download core

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::format_selector::FormatSelection;

/// Title used when the service reports none
pub const FALLBACK_TITLE: &str = "Unknown Title";

/// Media information from the extraction service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    /// 0 when unknown
    pub duration_seconds: u64,
    pub uploader: String,
    pub thumbnail_url: Option<String>,
}

/// Raw stream as reported by the service (`formats[]` in its JSON)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamFormat {
    pub format_id: String,
    pub ext: String,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub height: Option<u32>,
    /// Audio bitrate in kbps
    pub abr: Option<f64>,
    /// Total bitrate in kbps
    pub tbr: Option<f64>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
}

impl StreamFormat {
    pub fn effective_size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }

    fn has_codec(codec: &Option<String>) -> bool {
        codec
            .as_deref()
            .map_or(false, |c| !c.is_empty() && c != "none")
    }

    /// Audio stream without a video track
    pub fn is_audio_only(&self) -> bool {
        Self::has_codec(&self.acodec) && !Self::has_codec(&self.vcodec)
    }

    /// Audio bitrate, falling back to total bitrate for audio-only streams
    pub fn audio_bitrate(&self) -> Option<f64> {
        self.abr.or(self.tbr).filter(|b| *b > 0.0)
    }
}

/// Audio-only stream offered to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub id: String,
    pub container: String,
    pub codec: Option<String>,
    /// kbps; `None` means unknown, never shown as zero
    pub bitrate_kbps: Option<f64>,
    pub approx_size_bytes: Option<u64>,
}

impl From<&StreamFormat> for FormatDescriptor {
    fn from(f: &StreamFormat) -> Self {
        Self {
            id: f.format_id.clone(),
            container: f.ext.clone(),
            codec: f.acodec.clone(),
            bitrate_kbps: f.audio_bitrate(),
            approx_size_bytes: f.effective_size(),
        }
    }
}

/// Playlist entry from flat extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRef {
    pub title: String,
    pub duration_seconds: u64,
    pub url: String,
}

/// Lifecycle of one job; only the progress tracker moves it forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    Idle,
    Downloading,
    Converting,
    Done,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// A single pipeline run
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub source_url: String,
    pub sanitized_title: String,
    pub duration_seconds: u64,
    pub selection: FormatSelection,
    /// Expected output file (`<dir>/<title>.<ext>`)
    pub output_path: PathBuf,
    pub phase: JobPhase,
}

/// What a finished single-item pipeline reports back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub url: String,
    pub title: String,
    pub output_path: PathBuf,
    pub metadata_embedded: bool,
    /// Contained mux failure, if any
    pub mux_error: Option<String>,
    /// Credential provider failed and the run went unauthenticated
    pub auth_degraded: Option<String>,
}

/// `HH:MM:SS` for logs and listings
pub fn format_duration(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}
