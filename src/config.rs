#![forbid(unsafe_code)]

//! Runtime configuration: CLI overrides, then process env, then `.env`, then
//! defaults. Blank values count as unset.
//!
//! A missing `YOUTUBE_API_KEY` is not an error here; the provider client
//! degrades to empty metadata instead.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::enrich::EnrichmentPolicy;
use crate::provider::{DEFAULT_PROVIDER_TIMEOUT, ProviderKind, ProviderSettings};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DB_PATH: &str = "catalog.db";
pub const DEFAULT_CATALOG_PORT: u16 = 8080;
pub const DEFAULT_CATALOG_HOST: &str = "127.0.0.1";

const DB_PATH_KEY: &str = "CATALOG_DB_PATH";
const HOST_KEY: &str = "CATALOG_HOST";
const PORT_KEY: &str = "CATALOG_PORT";
const API_KEY_KEY: &str = "YOUTUBE_API_KEY";
const POLICY_KEY: &str = "LINK_ENRICHMENT_POLICY";
const PROVIDER_KEY: &str = "VIDEO_METADATA_PROVIDER";
const ENDPOINT_KEY: &str = "VIDEO_METADATA_ENDPOINT";
const TIMEOUT_KEY: &str = "PROVIDER_TIMEOUT_SECS";
const ADMIN_TOKEN_KEY: &str = "CATALOG_ADMIN_TOKEN";

#[derive(Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub policy: EnrichmentPolicy,
    pub provider: ProviderSettings,
    /// Bearer token for `/api/admin/*`. Without one the admin API is closed.
    pub admin_token: Option<String>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("db_path", &self.db_path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("policy", &self.policy)
            .field("provider", &self.provider)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AppConfig {
    /// True when the data API is selected but no key is available, which
    /// means every fetch will come back empty.
    pub fn missing_api_key(&self) -> bool {
        self.provider.kind == ProviderKind::DataApi && self.provider.api_key.is_none()
    }
}

/// Values given on the command line. They beat everything else.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub policy: Option<EnrichmentPolicy>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_config(overrides: ConfigOverrides) -> Result<AppConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig> {
    build_config_with_overrides(file_vars, env_lookup, ConfigOverrides::default())
}

fn build_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Result<AppConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let db_path = overrides
        .db_path
        .or_else(|| lookup(DB_PATH_KEY).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup(HOST_KEY))
        .unwrap_or_else(|| DEFAULT_CATALOG_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup(PORT_KEY).and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_CATALOG_PORT);

    let policy = match overrides.policy {
        Some(policy) => policy,
        None => match lookup(POLICY_KEY) {
            Some(raw) => EnrichmentPolicy::parse(&raw)
                .ok_or_else(|| anyhow!("{POLICY_KEY} must be `strict` or `lenient`, got {raw:?}"))?,
            None => EnrichmentPolicy::default(),
        },
    };

    let kind = match lookup(PROVIDER_KEY) {
        Some(raw) => ProviderKind::parse(&raw)
            .ok_or_else(|| anyhow!("{PROVIDER_KEY} must be `data-api` or `oembed`, got {raw:?}"))?,
        None => ProviderKind::default(),
    };
    let timeout = lookup(TIMEOUT_KEY)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_PROVIDER_TIMEOUT);

    Ok(AppConfig {
        db_path,
        host,
        port,
        policy,
        provider: ProviderSettings {
            kind,
            api_key: lookup(API_KEY_KEY),
            endpoint: lookup(ENDPOINT_KEY),
            timeout,
        },
        admin_token: lookup(ADMIN_TOKEN_KEY),
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

/// Parses a dotenv-style file. A missing file yields no variables.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), unquote(value_raw.trim()).to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .or_else(|| {
            value
                .strip_prefix('\'')
                .and_then(|value| value.strip_suffix('\''))
        })
        .unwrap_or(value)
}
