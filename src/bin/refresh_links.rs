#![forbid(unsafe_code)]

//! Re-runs link enrichment for every stored link. Acts like a nightly cron
//! job: rejected links are reported and left untouched, storage failures
//! abort the run.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use learning_catalog::{
    build_link_service,
    config::{ConfigOverrides, resolve_config},
    enrich::EnrichmentPolicy,
    logging,
    service::{LinkService, WriteError},
};

#[derive(Debug, Clone, Parser)]
#[command(name = "refresh_links", about = "Re-fetch video metadata for stored links")]
struct RefreshArgs {
    /// SQLite catalog file (CATALOG_DB_PATH).
    #[arg(long = "db")]
    db_path: Option<PathBuf>,
    /// Only refresh links attached to this topic.
    #[arg(long)]
    topic: Option<i64>,
    #[arg(long, value_parser = parse_policy_arg)]
    policy: Option<EnrichmentPolicy>,
    #[arg(long = "env-file")]
    env_file: Option<PathBuf>,
}

impl RefreshArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            db_path: self.db_path.clone(),
            policy: self.policy,
            env_path: self.env_file.clone(),
            ..ConfigOverrides::default()
        }
    }
}

fn parse_policy_arg(value: &str) -> Result<EnrichmentPolicy, String> {
    EnrichmentPolicy::parse(value).ok_or_else(|| format!("unknown policy {value:?}; use strict or lenient"))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RefreshSummary {
    refreshed: usize,
    rejected: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init()?;
    let args = RefreshArgs::parse();
    let config = resolve_config(args.overrides())?;
    let service = build_link_service(&config).await?;

    let summary = refresh_links(&service, args.topic).await?;
    println!();
    println!(
        "Refreshed {} link(s), {} rejected.",
        summary.refreshed, summary.rejected
    );
    Ok(())
}

async fn refresh_links(service: &LinkService, topic: Option<i64>) -> Result<RefreshSummary> {
    if let Some(topic_id) = topic {
        if service.store().get_topic(topic_id).await?.is_none() {
            bail!("topic {topic_id} not found");
        }
    }

    let links = service.store().list_links(topic).await?;
    if links.is_empty() {
        println!("No links to refresh.");
        return Ok(RefreshSummary::default());
    }
    println!("Found {} link(s) to refresh.", links.len());

    let mut summary = RefreshSummary::default();
    for (index, link) in links.iter().enumerate() {
        println!("[{}/{}] {}", index + 1, links.len(), link.url);
        match service.refresh_link(link.id).await {
            Ok(updated) => {
                summary.refreshed += 1;
                if let Some(title) = updated.derived.title.as_deref() {
                    println!("  {title}");
                }
            }
            Err(WriteError::Validation(err)) => {
                summary.rejected += 1;
                eprintln!("  Warning: {err}");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(summary)
}
