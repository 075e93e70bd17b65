#![forbid(unsafe_code)]

//! Link enrichment: turns a submitted URL into the derived link fields.
//!
//! The orchestration is explicit and I/O-free apart from the injected
//! [`MetadataProvider`]. Callers persist the returned [`DerivedFields`]
//! together with the URL in a single write.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::provider::{MetadataProvider, VideoMetadata};
use crate::video_id::{HostClass, VideoId, classify_host, extract_video_id};

pub const UNTITLED_VIDEO: &str = "Untitled Video";
pub const NO_DESCRIPTION: &str = "No description available.";

/// How the pipeline treats video links it cannot fully resolve.
///
/// One policy is chosen per process and applies to every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentPolicy {
    /// Reject the write when the id or the title cannot be resolved.
    #[default]
    Strict,
    /// Persist anyway, filling gaps with placeholders or leaving fields empty.
    Lenient,
}

impl EnrichmentPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" | "reject" => Some(Self::Strict),
            "lenient" | "permissive" => Some(Self::Lenient),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Lenient => "lenient",
        }
    }
}

/// Server-derived link columns. All `None` means "not enriched".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DerivedFields {
    pub video_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
}

impl DerivedFields {
    pub fn is_empty(&self) -> bool {
        self.video_id.is_none()
            && self.title.is_none()
            && self.description.is_none()
            && self.thumbnail_url.is_none()
    }
}

/// Reasons a link write is refused. Messages are shown to administrators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkValidationError {
    #[error("a link URL is required")]
    MissingUrl,
    #[error("{url} is not a recognized YouTube video link")]
    UnrecognizedVideoUrl { url: String },
    #[error("could not fetch essential data for {url}: the video may be private or deleted")]
    EssentialDataUnavailable { url: String },
}

pub struct LinkEnricher {
    provider: Arc<dyn MetadataProvider>,
    policy: EnrichmentPolicy,
}

impl LinkEnricher {
    pub fn new(provider: Arc<dyn MetadataProvider>, policy: EnrichmentPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn policy(&self) -> EnrichmentPolicy {
        self.policy
    }

    /// Runs extract → fetch → normalize for `url`.
    ///
    /// Blocks on the provider call. Returns either the complete set of
    /// derived fields or the validation failure that must abort the write.
    pub fn enrich(&self, url: &str) -> Result<DerivedFields, LinkValidationError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(LinkValidationError::MissingUrl);
        }

        if classify_host(url) == HostClass::Other {
            tracing::debug!(url, "not a video link; storing without metadata");
            return Ok(DerivedFields::default());
        }

        let Some(video_id) = extract_video_id(url) else {
            return match self.policy {
                EnrichmentPolicy::Strict => Err(LinkValidationError::UnrecognizedVideoUrl {
                    url: url.to_string(),
                }),
                EnrichmentPolicy::Lenient => {
                    tracing::warn!(url, "could not extract a video id; storing without metadata");
                    Ok(DerivedFields::default())
                }
            };
        };

        let metadata = self.provider.fetch_metadata(&video_id);
        self.normalize(url, &video_id, metadata)
    }

    fn normalize(
        &self,
        url: &str,
        video_id: &VideoId,
        metadata: VideoMetadata,
    ) -> Result<DerivedFields, LinkValidationError> {
        let title = match (metadata.title, self.policy) {
            (Some(title), _) => title,
            (None, EnrichmentPolicy::Strict) => {
                return Err(LinkValidationError::EssentialDataUnavailable {
                    url: url.to_string(),
                });
            }
            (None, EnrichmentPolicy::Lenient) => {
                tracing::warn!(%video_id, "no title available; using placeholder");
                UNTITLED_VIDEO.to_string()
            }
        };

        let description = metadata
            .description
            .map(|text| truncate_to_first_sentence(&text))
            .unwrap_or_else(|| NO_DESCRIPTION.to_string());

        let thumbnail_url = metadata
            .thumbnail_url
            .unwrap_or_else(|| video_id.fallback_thumbnail_url());

        Ok(DerivedFields {
            video_id: Some(video_id.to_string()),
            title: Some(title),
            description: Some(description),
            thumbnail_url: Some(thumbnail_url),
        })
    }
}

/// Keeps everything before the first `". "` plus its period; text without
/// that separator is returned unchanged.
pub fn truncate_to_first_sentence(text: &str) -> String {
    match text.split_once(". ") {
        Some((first, _)) => format!("{first}."),
        None => text.to_string(),
    }
}
