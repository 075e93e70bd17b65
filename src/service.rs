#![forbid(unsafe_code)]

//! Link write path: enrich first, then persist in one statement.
//!
//! A validation failure returns before the store is touched, so a rejected
//! write never leaves a partial row behind.

use std::sync::Arc;

use thiserror::Error;

use crate::catalog::{CatalogStore, Link, StoreError};
use crate::enrich::{DerivedFields, EnrichmentPolicy, LinkEnricher, LinkValidationError};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Validation(#[from] LinkValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("enrichment task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct LinkService {
    store: Arc<CatalogStore>,
    enricher: Arc<LinkEnricher>,
}

impl LinkService {
    pub fn new(store: Arc<CatalogStore>, enricher: Arc<LinkEnricher>) -> Self {
        Self { store, enricher }
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    pub fn policy(&self) -> EnrichmentPolicy {
        self.enricher.policy()
    }

    pub async fn create_link(&self, topic_id: i64, url: &str) -> Result<Link, WriteError> {
        if self.store.get_topic(topic_id).await?.is_none() {
            return Err(StoreError::not_found("topic", topic_id).into());
        }
        let url = url.trim().to_string();
        let derived = self.enrich(&url).await?;
        let link = self.store.insert_link(topic_id, &url, &derived).await?;
        tracing::info!(
            link_id = link.id,
            topic_id,
            video_id = link.derived.video_id.as_deref().unwrap_or("-"),
            "link created"
        );
        Ok(link)
    }

    /// Re-runs the whole pipeline for the new URL and overwrites every
    /// derived field of the link.
    pub async fn update_link(&self, id: i64, url: &str) -> Result<Link, WriteError> {
        if self.store.get_link(id).await?.is_none() {
            return Err(StoreError::not_found("link", id).into());
        }
        let url = url.trim().to_string();
        let derived = self.enrich(&url).await?;
        let link = self.store.update_link(id, &url, &derived).await?;
        tracing::info!(
            link_id = id,
            video_id = link.derived.video_id.as_deref().unwrap_or("-"),
            "link updated"
        );
        Ok(link)
    }

    /// Re-enriches a stored link from its current URL.
    pub async fn refresh_link(&self, id: i64) -> Result<Link, WriteError> {
        let existing = self
            .store
            .get_link(id)
            .await?
            .ok_or_else(|| StoreError::not_found("link", id))?;
        let derived = self.enrich(&existing.url).await?;
        let link = self.store.update_link(id, &existing.url, &derived).await?;
        tracing::debug!(link_id = id, "link refreshed");
        Ok(link)
    }

    // The provider client blocks on network I/O; keep it off the async workers.
    async fn enrich(&self, url: &str) -> Result<DerivedFields, WriteError> {
        let enricher = self.enricher.clone();
        let url = url.to_string();
        let result = tokio::task::spawn_blocking(move || enricher.enrich(&url)).await?;
        result.map_err(|err| {
            tracing::warn!(error = %err, policy = self.policy().as_str(), "link rejected");
            WriteError::Validation(err)
        })
    }
}
