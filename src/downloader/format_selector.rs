// FormatSelector - maps a quality choice to a service selector
//
// One place decides the format expression, the post-processing step and the
// final container, so the adapter and the muxer never branch on audio vs video.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    #[default]
    Mp3,
    M4a,
    Opus,
}

impl AudioCodec {
    /// Name understood by `--audio-format`, also the file extension
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Opus => "opus",
        }
    }
}

/// What the user asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum QualityChoice {
    Audio { bitrate_kbps: u32, codec: AudioCodec },
    /// `None` means best available
    Video { max_height: Option<u32> },
}

impl Default for QualityChoice {
    fn default() -> Self {
        Self::Audio {
            bitrate_kbps: 192,
            codec: AudioCodec::Mp3,
        }
    }
}

impl QualityChoice {
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio { .. })
    }
}

/// Step the transcoder performs after the fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostProcess {
    ExtractAudio { codec: AudioCodec, bitrate_kbps: u32 },
    /// Merge separate streams and remux into one container
    Remux { container: &'static str },
}

/// Resolved selector plus everything derived from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSelection {
    pub selector: String,
    pub post: PostProcess,
}

impl FormatSelection {
    pub fn output_ext(&self) -> &'static str {
        match &self.post {
            PostProcess::ExtractAudio { codec, .. } => codec.as_str(),
            PostProcess::Remux { container } => container,
        }
    }

    /// Both audio extraction and container remuxing run through the transcoder
    pub fn requires_transcoder(&self) -> bool {
        match &self.post {
            PostProcess::ExtractAudio { .. } => true,
            PostProcess::Remux { .. } => self.selector.contains('+'),
        }
    }

    /// Tags and cover art are only written into audio files
    pub fn wants_metadata(&self) -> bool {
        matches!(self.post, PostProcess::ExtractAudio { .. })
    }

    /// Service arguments for the format and the post-processing step
    pub fn service_args(&self) -> Vec<String> {
        let mut args = vec!["-f".to_string(), self.selector.clone()];
        match &self.post {
            PostProcess::ExtractAudio {
                codec,
                bitrate_kbps,
            } => {
                args.push("-x".to_string());
                args.push("--audio-format".to_string());
                args.push(codec.as_str().to_string());
                args.push("--audio-quality".to_string());
                args.push(format!("{}K", bitrate_kbps));
            }
            PostProcess::Remux { container } => {
                args.push("--merge-output-format".to_string());
                args.push(container.to_string());
                if self.requires_transcoder() {
                    args.push("--remux-video".to_string());
                    args.push(container.to_string());
                }
            }
        }
        args
    }
}

pub struct FormatSelector;

impl FormatSelector {
    /// Selector for a quality choice
    pub fn resolve(choice: &QualityChoice) -> FormatSelection {
        Self::resolve_with_format(choice, None)
    }

    /// Same as [`resolve`](Self::resolve), pinning an explicit audio format id
    /// (from `list_audio_formats`) ahead of the generic fallback
    pub fn resolve_with_format(choice: &QualityChoice, format_id: Option<&str>) -> FormatSelection {
        match *choice {
            QualityChoice::Audio {
                bitrate_kbps,
                codec,
            } => {
                let selector = match format_id {
                    Some(id) if !id.trim().is_empty() => format!("{}/bestaudio/best", id.trim()),
                    _ => "bestaudio/best".to_string(),
                };
                FormatSelection {
                    selector,
                    post: PostProcess::ExtractAudio {
                        codec,
                        bitrate_kbps,
                    },
                }
            }
            QualityChoice::Video { max_height } => {
                let selector = match max_height {
                    Some(h) => format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]"),
                    None => "bestvideo+bestaudio/best".to_string(),
                };
                FormatSelection {
                    selector,
                    post: PostProcess::Remux { container: "mp4" },
                }
            }
        }
    }
}
