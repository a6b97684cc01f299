// URL shape checks, run before any network call

use regex::Regex;

use super::errors::ValidationError;

/// Accepted YouTube link shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlShape {
    /// `youtube.com/watch?v=<id>`
    Watch,
    /// `youtu.be/<id>`
    ShortLink,
    /// `youtube.com/embed/<id>`
    Embed,
    /// `youtube.com/shorts/<id>`
    Shorts,
    /// `youtube.com/playlist?list=<id>`
    Playlist,
}

lazy_static::lazy_static! {
    static ref SHAPES: Vec<(UrlShape, Regex)> = vec![
        (UrlShape::Watch, Regex::new(r"(?i)^https?://(www\.)?youtube\.com/watch\?v=[\w-]+").unwrap()),
        (UrlShape::ShortLink, Regex::new(r"(?i)^https?://(www\.)?youtu\.be/[\w-]+").unwrap()),
        (UrlShape::Embed, Regex::new(r"(?i)^https?://(www\.)?youtube\.com/embed/[\w-]+").unwrap()),
        (UrlShape::Shorts, Regex::new(r"(?i)^https?://(www\.)?youtube\.com/shorts/[\w-]+").unwrap()),
        (UrlShape::Playlist, Regex::new(r"(?i)^https?://(www\.)?youtube\.com/playlist\?list=[\w-]+").unwrap()),
    ];
    static ref LIST_PARAM: Regex = Regex::new(r"[?&]list=[\w-]+").unwrap();
}

/// Classify a URL, or reject it
pub fn validate_url(url: &str) -> Result<UrlShape, ValidationError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ValidationError::Empty);
    }

    SHAPES
        .iter()
        .find(|(_, re)| re.is_match(url))
        .map(|(shape, _)| *shape)
        .ok_or_else(|| ValidationError::UnsupportedUrl(url.to_string()))
}

/// Carries a `list=` parameter, so flat playlist extraction applies
pub fn is_playlist_url(url: &str) -> bool {
    LIST_PARAM.is_match(url.trim())
}
