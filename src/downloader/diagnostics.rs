// Classifies extraction-service stderr into blocking reasons
//
// The extraction service reports failures as free text. These reasons let the
// error layer tell "needs credentials" apart from "blocked" and "gone".

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockingReason {
    /// HTTP 403 without a more specific cause
    Http403Forbidden,

    /// Proof of Origin token required by the player client
    PoTokenRequired,

    AgeRestricted,

    GeoBlocked,

    /// Socket timeouts and refused connections (often soft throttling)
    NetworkTimeout,

    RateLimited,

    /// "Sign in to confirm you're not a bot"
    BotDetection,

    PrivateVideo,

    /// Deleted or otherwise gone
    VideoUnavailable,

    /// Premium, rental or Widevine content; never downloadable
    DrmProtected,

    MembersOnly,

    Unknown,
}

/// Match table, checked top to bottom; the first hit wins.
/// Entries are regex fragments matched case-insensitively on word boundaries.
const PATTERNS: &[(BlockingReason, &[&str])] = &[
    (
        BlockingReason::DrmProtected,
        &[
            "drm",
            "widevine",
            "playready",
            "encrypted media",
            "youtube premium",
            "requires (?:purchase|payment)",
            "rental",
        ],
    ),
    (
        BlockingReason::MembersOnly,
        &["members[- ]only", "join this channel", "available to members"],
    ),
    (BlockingReason::PoTokenRequired, &["po token", "proof of origin"]),
    (
        BlockingReason::AgeRestricted,
        &["age-restricted", "confirm your age", "inappropriate for some users"],
    ),
    (
        BlockingReason::PrivateVideo,
        &["private video", "video is private", "been granted access"],
    ),
    (
        BlockingReason::VideoUnavailable,
        &["video (?:is )?unavailable", "has been removed", "no longer available"],
    ),
    (
        BlockingReason::GeoBlocked,
        &["(?:available|blocked) in your country", r"geo[- ]restrict\w*"],
    ),
    (
        BlockingReason::RateLimited,
        &["http error 429", "too many requests", "rate limit\\w*"],
    ),
    (
        BlockingReason::BotDetection,
        &["not a bot", "captcha", "unusual traffic", "automated queries"],
    ),
    (BlockingReason::Http403Forbidden, &["403", "forbidden"]),
    (
        BlockingReason::NetworkTimeout,
        &[
            "timed out",
            "timeout",
            "connection refused",
            "network is unreachable",
            "temporary failure in name resolution",
        ],
    ),
];

lazy_static::lazy_static! {
    static ref MATCHERS: Vec<(BlockingReason, Regex)> = PATTERNS
        .iter()
        .map(|(reason, needles)| {
            let pattern = format!(r"(?i)\b(?:{})\b", needles.join("|"));
            (*reason, Regex::new(&pattern).unwrap())
        })
        .collect();

    /// `[youtube] <id>:` style prefix; ids are random text and must not be matched
    static ref SUBJECT_PREFIX: Regex = Regex::new(r"\[[^\]\s]+\]\s+[\w-]+:").unwrap();
}

impl BlockingReason {
    /// Browser cookies are the usual fix
    pub fn cookies_might_help(&self) -> bool {
        matches!(
            self,
            Self::Http403Forbidden
                | Self::PoTokenRequired
                | Self::AgeRestricted
                | Self::BotDetection
                | Self::PrivateVideo
                | Self::MembersOnly
        )
    }

    pub fn proxy_might_help(&self) -> bool {
        matches!(
            self,
            Self::Http403Forbidden
                | Self::GeoBlocked
                | Self::NetworkTimeout
                | Self::RateLimited
                | Self::BotDetection
        )
    }

    /// No setting change will make this content downloadable
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::DrmProtected | Self::VideoUnavailable)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Http403Forbidden => "access denied (HTTP 403)",
            Self::PoTokenRequired => "proof of origin token required",
            Self::AgeRestricted => "age-restricted content",
            Self::GeoBlocked => "not available in this region",
            Self::NetworkTimeout => "network timeout",
            Self::RateLimited => "rate limited",
            Self::BotDetection => "bot check triggered",
            Self::PrivateVideo => "private video",
            Self::VideoUnavailable => "video unavailable",
            Self::DrmProtected => "DRM-protected content",
            Self::MembersOnly => "members-only content",
            Self::Unknown => "unknown reason",
        }
    }

    /// Hint shown next to the error in the host UI
    pub fn hint(&self) -> Option<&'static str> {
        if self.is_permanent() {
            return Some("This content cannot be downloaded.");
        }
        if self.cookies_might_help() {
            return Some("Retry with cookies from a browser where you are signed in.");
        }
        if self.proxy_might_help() {
            return Some("Retry later or through a proxy.");
        }
        None
    }
}

/// Map an error message to a blocking reason.
/// Returns `None` only for an empty message.
pub fn diagnose_error(error: &str) -> Option<BlockingReason> {
    if error.trim().is_empty() {
        return None;
    }

    let message = SUBJECT_PREFIX.replace_all(error, "");
    let reason = MATCHERS
        .iter()
        .find(|(_, re)| re.is_match(&message))
        .map(|(reason, _)| *reason)
        .unwrap_or(BlockingReason::Unknown);

    Some(reason)
}
