// Error taxonomy for the download core

use std::path::PathBuf;

use thiserror::Error;

use super::diagnostics::{diagnose_error, BlockingReason};

/// URL rejected before any network call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid URL: {0} is not a supported YouTube link")]
    UnsupportedUrl(String),

    #[error("Empty URL")]
    Empty,
}

/// Failures surfaced by the extraction service
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    /// Login, bot check or age gate; the host should offer a credential provider
    #[error("Authentication required ({}): {detail}", reason.description())]
    AuthRequired {
        reason: BlockingReason,
        detail: String,
    },

    /// Throttling, geo block, HTTP 403 and similar
    #[error("Blocked by YouTube ({}): {detail}", reason.description())]
    Blocked {
        reason: BlockingReason,
        detail: String,
    },

    /// Deleted, DRM-protected or otherwise not downloadable
    #[error("Content unavailable ({}): {detail}", reason.description())]
    Unavailable {
        reason: BlockingReason,
        detail: String,
    },

    /// Requested format is not offered by the source
    #[error("Requested format is not available: {0}")]
    FormatUnavailable(String),

    #[error("Not a playlist URL: {0}")]
    NotAPlaylist(String),

    #[error("Unsupported URL: {0}")]
    BadUrl(String),

    /// yt-dlp binary missing or not executable
    #[error("Extraction tool not found: {0}")]
    ServiceNotFound(String),

    #[error("Extraction timed out after {0}s")]
    Timeout(u64),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Extraction failed: {0}")]
    Failed(String),
}

impl ExtractionError {
    /// Auth and bot-check failures are reported distinctly so the host can prompt
    pub fn needs_credentials(&self) -> bool {
        matches!(self, Self::AuthRequired { .. })
    }

    pub fn reason(&self) -> Option<BlockingReason> {
        match self {
            Self::AuthRequired { reason, .. } | Self::Blocked { reason, .. } | Self::Unavailable { reason, .. } => {
                Some(*reason)
            }
            _ => None,
        }
    }

    /// Build from the service's stderr, using the blocking diagnostics
    pub fn from_stderr(stderr: &str) -> Self {
        let detail = summarize_stderr(stderr);

        if stderr.contains("Requested format is not available") {
            return Self::FormatUnavailable(detail);
        }
        if stderr.contains("Unsupported URL") || stderr.contains("is not a valid URL") {
            return Self::BadUrl(detail);
        }

        match diagnose_error(stderr) {
            Some(reason) if reason.cookies_might_help() && !reason.proxy_might_help() => {
                Self::AuthRequired { reason, detail }
            }
            Some(BlockingReason::BotDetection) => Self::AuthRequired {
                reason: BlockingReason::BotDetection,
                detail,
            },
            Some(reason) if reason.is_permanent() => Self::Unavailable { reason, detail },
            Some(BlockingReason::Unknown) | None => Self::Failed(detail),
            Some(reason) => Self::Blocked { reason, detail },
        }
    }
}

/// First lines of stderr that look like errors, for compact messages
fn summarize_stderr(stderr: &str) -> String {
    let important: Vec<&str> = stderr
        .lines()
        .map(|l| l.trim())
        .filter(|l| l.starts_with("ERROR:") || l.contains("HTTP Error"))
        .take(2)
        .collect();

    if !important.is_empty() {
        return important.join(" | ");
    }

    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("unknown error")
        .trim()
        .chars()
        .take(200)
        .collect()
}

/// No usable transcoder; carries per-platform manual install steps
#[derive(Debug, Clone, Error)]
#[error("FFmpeg not found.\n\n{guidance}")]
pub struct TranscoderNotFound {
    pub guidance: String,
}

impl TranscoderNotFound {
    pub fn new() -> Self {
        Self {
            guidance: manual_install_guidance(),
        }
    }
}

impl Default for TranscoderNotFound {
    fn default() -> Self {
        Self::new()
    }
}

/// Manual install steps for every supported platform
pub fn manual_install_guidance() -> String {
    "Install FFmpeg manually:\n\
     - Windows: download https://github.com/BtbN/FFmpeg-Builds/releases (ffmpeg-master-latest-win64-gpl.zip)\n\
       and extract it next to this program, or add its bin folder to PATH\n\
     - macOS: brew install ffmpeg\n\
     - Linux: sudo apt-get install ffmpeg (or dnf/yum/pacman)\n\
     Then restart, or point the downloader at the ffmpeg binary."
        .to_string()
}

#[derive(Debug, Error)]
pub enum InstallError {
    /// Not found and installing was not allowed
    #[error(transparent)]
    NotFound(#[from] TranscoderNotFound),

    #[error("Automatic FFmpeg install is not supported on {0}.\n\n{guidance}", guidance = manual_install_guidance())]
    UnsupportedPlatform(String),

    #[error("Failed to download {url}: {message}\n\n{guidance}", guidance = manual_install_guidance())]
    Download { url: String, message: String },

    #[error("Failed to extract FFmpeg archive: {0}\n\n{guidance}", guidance = manual_install_guidance())]
    Extract(String),

    #[error("FFmpeg binary not found after install: {0}\n\n{guidance}", guidance = manual_install_guidance())]
    MissingBinary(PathBuf),

    #[error("FFmpeg install failed: {0}\n\n{guidance}", guidance = manual_install_guidance())]
    Io(#[from] std::io::Error),
}

/// Tag/cover embedding failure; logged, never fails a job
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("Thumbnail download failed: {0}")]
    Thumbnail(String),

    #[error("FFmpeg mux failed: {0}")]
    Transcoder(String),

    #[error("Could not replace original file: {0}")]
    Replace(String),

    #[error("Mux I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Credential provider could not supply cookies; the adapter degrades to unauthenticated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("Permission denied reading {browser} cookies: {guidance}")]
    PermissionDenied { browser: String, guidance: String },

    #[error("Unsupported browser for cookies: {0}")]
    UnsupportedBrowser(String),

    #[error("Cookie store unreadable: {0}")]
    StoreUnreadable(String),

    #[error("Cookie file not found: {0}")]
    FileNotFound(PathBuf),
}

/// Single-item pipeline failure
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// A job needs transcoding but no binary was resolved
    #[error("Transcoding required but unavailable: {0}")]
    TranscoderRequired(#[from] TranscoderNotFound),

    #[error("Output file missing after download: {0}")]
    OutputMissing(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    pub fn needs_credentials(&self) -> bool {
        matches!(self, Self::Extraction(e) if e.needs_credentials())
    }

    /// What the user can try next, when the failure was diagnosed
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Extraction(e) => e.reason().and_then(|r| r.hint()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_check_maps_to_auth_required() {
        let err = ExtractionError::from_stderr(
            "ERROR: [youtube] abc: Sign in to confirm you're not a bot",
        );
        assert!(err.needs_credentials());
    }

    #[test]
    fn video_id_does_not_change_classification() {
        let err = ExtractionError::from_stderr(
            "ERROR: [youtube] aDrMx0Lq9Zk: Sign in to confirm you're not a bot",
        );
        assert!(matches!(
            err,
            ExtractionError::AuthRequired {
                reason: BlockingReason::BotDetection,
                ..
            }
        ));

        let err = ExtractionError::from_stderr("ERROR: [youtube] x403abcdefg: Read timed out.");
        assert!(matches!(
            err,
            ExtractionError::Blocked {
                reason: BlockingReason::NetworkTimeout,
                ..
            }
        ));
    }

    #[test]
    fn age_gate_maps_to_auth_required() {
        let err = ExtractionError::from_stderr("ERROR: Sign in to confirm your age");
        assert!(matches!(
            err,
            ExtractionError::AuthRequired {
                reason: BlockingReason::AgeRestricted,
                ..
            }
        ));
    }

    #[test]
    fn geo_block_is_blocked_not_auth() {
        let err = ExtractionError::from_stderr(
            "ERROR: The uploader has not made this video available in your country",
        );
        assert!(matches!(
            err,
            ExtractionError::Blocked {
                reason: BlockingReason::GeoBlocked,
                ..
            }
        ));
        assert!(!err.needs_credentials());
    }

    #[test]
    fn removed_video_is_unavailable() {
        let err = ExtractionError::from_stderr("ERROR: Video unavailable. This video has been removed");
        assert!(matches!(err, ExtractionError::Unavailable { .. }));
    }

    #[test]
    fn download_error_carries_next_step_hint() {
        let geo = DownloadError::from(ExtractionError::from_stderr(
            "ERROR: The uploader has not made this video available in your country",
        ));
        assert_eq!(geo.hint(), Some("Retry later or through a proxy."));

        let removed = DownloadError::from(ExtractionError::from_stderr("ERROR: Video unavailable"));
        assert_eq!(removed.hint(), Some("This content cannot be downloaded."));

        let missing = DownloadError::OutputMissing(PathBuf::from("/tmp/x.mp3"));
        assert_eq!(missing.hint(), None);
    }

    #[test]
    fn missing_format_is_typed() {
        let err = ExtractionError::from_stderr("ERROR: Requested format is not available");
        assert!(matches!(err, ExtractionError::FormatUnavailable(_)));
    }

    #[test]
    fn summary_prefers_error_lines() {
        let stderr = "WARNING: something\nERROR: HTTP Error 403: Forbidden\nmore noise";
        assert_eq!(summarize_stderr(stderr), "ERROR: HTTP Error 403: Forbidden");
    }

    #[test]
    fn transcoder_guidance_lists_each_platform() {
        let text = TranscoderNotFound::new().to_string();
        assert!(text.contains("Windows"));
        assert!(text.contains("brew install ffmpeg"));
        assert!(text.contains("apt-get"));
    }
}
