#![forbid(unsafe_code)]

//! Recognizes YouTube links and pulls out the canonical video id.
//!
//! Everything in here is pure string/URL handling. The orchestrator in
//! [`crate::enrich`] decides what a missing id means for a write.

use std::fmt;

use serde::Serialize;
use url::{ParseError, Url};

const VIDEO_ID_LEN: usize = 11;

// Registrable domains served by the provider. Subdomains (www., m., music.)
// are matched by suffix.
const VIDEO_DOMAINS: &[&str] = &["youtube.com", "youtube-nocookie.com", "youtu.be"];

// Path shapes of the form `/<prefix>/<id>` on the main domains.
const ID_PATH_PREFIXES: &[&str] = &["embed", "shorts", "v", "live"];

/// Canonical 11-character YouTube video id (`[A-Za-z0-9_-]{11}`).
///
/// The only way to build one is [`VideoId::parse`], so holding a `VideoId`
/// means the format has already been checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Accepts `candidate` only if it is exactly an id, never a prefix of one.
    pub fn parse(candidate: &str) -> Option<Self> {
        is_valid_id(candidate).then(|| Self(candidate.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }

    /// Thumbnail the image CDN serves for every public video.
    pub fn fallback_thumbnail_url(&self) -> String {
        format!("https://img.youtube.com/vi/{}/hqdefault.jpg", self.0)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VideoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_valid_id(candidate: &str) -> bool {
    candidate.len() == VIDEO_ID_LEN
        && candidate
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_')
}

/// Where a submitted link points, as far as enrichment is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostClass {
    /// Parsed and the host belongs to the video provider.
    Video,
    /// Parsed, but the host is somebody else's (plain reference link).
    Other,
    /// Could not be read as a URL at all.
    Unparseable,
}

pub fn classify_host(input: &str) -> HostClass {
    let Some(url) = parse_lenient(input) else {
        return HostClass::Unparseable;
    };
    match url.host_str() {
        Some(host) if is_video_host(host) => HostClass::Video,
        Some(_) => HostClass::Other,
        None => HostClass::Unparseable,
    }
}

/// Extracts the video id from any supported link shape.
///
/// Supported shapes (scheme and `www.` optional):
/// `youtube.com/watch?v=ID`, `youtu.be/ID`, `youtube.com/embed/ID`,
/// `youtube.com/shorts/ID`, `youtube.com/v/ID`, `youtube.com/live/ID`.
///
/// A `v=` query parameter always wins over path segments. When it is present
/// but malformed the link is rejected instead of guessing from the path.
pub fn extract_video_id(input: &str) -> Option<VideoId> {
    let url = parse_lenient(input)?;
    let host = url.host_str()?;
    if !is_video_host(host) {
        return None;
    }

    if let Some((_, value)) = url.query_pairs().find(|(key, _)| key == "v") {
        return VideoId::parse(&value);
    }

    let mut segments = url.path_segments()?.filter(|segment| !segment.is_empty());
    let first = segments.next()?;
    if is_short_link_host(host) {
        return VideoId::parse(first);
    }
    if ID_PATH_PREFIXES.contains(&first) {
        return segments.next().and_then(VideoId::parse);
    }
    None
}

fn parse_lenient(input: &str) -> Option<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    match Url::parse(trimmed) {
        Ok(url) => Some(url),
        // No scheme: `youtube.com/watch?v=...`, `youtu.be/...`.
        Err(ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{trimmed}")).ok(),
        Err(_) => None,
    }
}

fn is_video_host(host: &str) -> bool {
    let host = host.trim_end_matches('.');
    VIDEO_DOMAINS.iter().any(|domain| {
        host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|rest| rest.ends_with('.'))
    })
}

fn is_short_link_host(host: &str) -> bool {
    matches!(host.trim_end_matches('.'), "youtu.be" | "www.youtu.be")
}
