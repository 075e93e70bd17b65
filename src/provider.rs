#![forbid(unsafe_code)]

//! Clients for the external video-data provider.
//!
//! Fetching is best effort: a single request per call, no retries, and every
//! failure (missing key, network, HTTP status, bad JSON, unknown video)
//! collapses into an empty [`VideoMetadata`] after being logged. Nothing in
//! here can fail a catalog write by itself.

use std::{fmt, sync::Arc, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::video_id::VideoId;

pub const DATA_API_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3";
pub const OEMBED_ENDPOINT: &str = "https://www.youtube.com/oembed";
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Normalized metadata for one video. Every field may legitimately be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
}

impl VideoMetadata {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.thumbnail_url.is_none()
    }
}

/// Seam between the enrichment pipeline and the network.
///
/// Implementations block the calling thread; async callers should run them
/// through `spawn_blocking`.
pub trait MetadataProvider: Send + Sync {
    fn fetch_metadata(&self, video_id: &VideoId) -> VideoMetadata;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    /// YouTube Data API v3 `videos` endpoint (needs an API key).
    #[default]
    DataApi,
    /// Keyless oEmbed endpoint. Title and thumbnail only.
    OEmbed,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "data-api" | "data_api" | "dataapi" | "youtube" => Some(Self::DataApi),
            "oembed" => Some(Self::OEmbed),
            _ => None,
        }
    }

    fn default_endpoint(self) -> &'static str {
        match self {
            Self::DataApi => DATA_API_ENDPOINT,
            Self::OEmbed => OEMBED_ENDPOINT,
        }
    }
}

#[derive(Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    /// Overrides the provider's public endpoint (used against local stubs).
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            api_key: None,
            endpoint: None,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }
}

// Keeps the API key out of logs.
impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProviderSettings {
    fn endpoint(&self) -> String {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.kind.default_endpoint())
            .trim_end_matches('/')
            .to_string()
    }
}

/// Builds the provider selected by `settings`.
pub fn build_provider(settings: &ProviderSettings) -> Arc<dyn MetadataProvider> {
    match settings.kind {
        ProviderKind::DataApi => Arc::new(YouTubeDataClient::new(settings)),
        ProviderKind::OEmbed => Arc::new(OEmbedClient::new(settings)),
    }
}

#[derive(Debug, Error)]
enum ProviderError {
    #[error("provider returned HTTP {0}")]
    Status(u16),
    #[error("provider unreachable: {0}")]
    Transport(String),
    #[error("malformed provider response: {0}")]
    Decode(#[from] std::io::Error),
}

impl From<ureq::Error> for ProviderError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => Self::Status(code),
            // The transport's Display carries the request URL, which holds the API key.
            ureq::Error::Transport(transport) => Self::Transport(match transport.message() {
                Some(message) => format!("{}: {message}", transport.kind()),
                None => transport.kind().to_string(),
            }),
        }
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// Client for the YouTube Data API `videos?part=snippet` lookup.
pub struct YouTubeDataClient {
    agent: ureq::Agent,
    api_key: Option<String>,
    endpoint: String,
}

impl YouTubeDataClient {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            agent: build_agent(settings.timeout),
            api_key: settings
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string),
            endpoint: settings.endpoint(),
        }
    }

    fn request_snippet(&self, api_key: &str, video_id: &VideoId) -> Result<Option<Snippet>, ProviderError> {
        let response: VideoListResponse = self
            .agent
            .get(&format!("{}/videos", self.endpoint))
            .query("part", "snippet")
            .query("id", video_id.as_str())
            .query("key", api_key)
            .call()?
            .into_json()?;
        Ok(response
            .items
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|item| item.snippet))
    }
}

impl MetadataProvider for YouTubeDataClient {
    fn fetch_metadata(&self, video_id: &VideoId) -> VideoMetadata {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!(%video_id, "YOUTUBE_API_KEY is not configured; skipping metadata fetch");
            return VideoMetadata::empty();
        };

        match self.request_snippet(api_key, video_id) {
            Ok(Some(snippet)) => snippet.into_metadata(),
            Ok(None) => {
                tracing::warn!(%video_id, "provider returned no items; video may be private or deleted");
                VideoMetadata::empty()
            }
            Err(err) => {
                tracing::warn!(%video_id, error = %err, "metadata fetch failed");
                VideoMetadata::empty()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    items: Option<Vec<VideoItem>>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    snippet: Option<Snippet>,
}

#[derive(Debug, Default, Deserialize)]
struct Snippet {
    title: Option<String>,
    description: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: Option<String>,
}

impl Thumbnails {
    /// Highest resolution the provider actually returned.
    fn best_url(&self) -> Option<String> {
        [&self.high, &self.medium, &self.default]
            .into_iter()
            .flatten()
            .find_map(|thumbnail| non_blank(thumbnail.url.clone()))
    }
}

impl Snippet {
    fn into_metadata(self) -> VideoMetadata {
        let thumbnail_url = self.thumbnails.best_url();
        VideoMetadata {
            title: non_blank(self.title),
            description: non_blank(self.description),
            thumbnail_url,
        }
    }
}

/// Client for the keyless oEmbed endpoint. It never yields a description.
pub struct OEmbedClient {
    agent: ureq::Agent,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: Option<String>,
    thumbnail_url: Option<String>,
}

impl OEmbedClient {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            agent: build_agent(settings.timeout),
            endpoint: settings.endpoint(),
        }
    }

    fn request(&self, video_id: &VideoId) -> Result<OEmbedResponse, ProviderError> {
        let response = self
            .agent
            .get(&self.endpoint)
            .query("url", &video_id.watch_url())
            .query("format", "json")
            .call()?
            .into_json()?;
        Ok(response)
    }
}

impl MetadataProvider for OEmbedClient {
    fn fetch_metadata(&self, video_id: &VideoId) -> VideoMetadata {
        match self.request(video_id) {
            Ok(response) => VideoMetadata {
                title: non_blank(response.title),
                description: None,
                thumbnail_url: non_blank(response.thumbnail_url),
            },
            Err(err) => {
                tracing::warn!(%video_id, error = %err, "oEmbed lookup failed");
                VideoMetadata::empty()
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}
