#![forbid(unsafe_code)]

//! Learning catalog: subjects, chapters, topics and YouTube links enriched
//! with video metadata at write time.

pub mod catalog;
pub mod config;
pub mod enrich;
pub mod logging;
pub mod provider;
pub mod service;
pub mod video_id;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::catalog::CatalogStore;
use crate::config::AppConfig;
use crate::enrich::LinkEnricher;
use crate::provider::build_provider;
use crate::service::LinkService;

/// Opens the store and wires the provider and enricher selected by `config`.
pub async fn build_link_service(config: &AppConfig) -> Result<LinkService> {
    let store = CatalogStore::open(&config.db_path)
        .await
        .context("initializing catalog store")?;
    if config.missing_api_key() {
        tracing::warn!("YOUTUBE_API_KEY is not set; video links will be stored without provider metadata");
    }
    let provider = build_provider(&config.provider);
    let enricher = LinkEnricher::new(provider, config.policy);
    tracing::info!(
        db = %config.db_path.display(),
        policy = config.policy.as_str(),
        provider = ?config.provider.kind,
        "catalog ready"
    );
    Ok(LinkService::new(Arc::new(store), Arc::new(enricher)))
}
