use std::fs;
use std::path::Path;

use anyhow::Result;
use catalog_sync_core::config::SyncConfig;
use serde::Deserialize;
use tracing::{error, info};

/// Name of the environment variable holding the upstream API key.
pub const API_KEY_ENV: &str = "CATALOG_API_KEY";

/// Everything the binary needs for one invocation.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub upstream: UpstreamSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSettings {
    /// API root, e.g. `https://api.sandbox.example.com/partner`.
    pub base_url: String,
    #[serde(default = "default_source_currencies")]
    pub source_currencies: Vec<String>,
    #[serde(default = "default_target_currencies")]
    pub target_currencies: Vec<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Injected from the environment, never read from the file.
    #[serde(skip)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// Elasticsearch root, e.g. `http://localhost:9200`.
    pub url: String,
    /// Append an audit record per bulk write.
    #[serde(default = "default_audit")]
    pub audit: bool,
}

#[derive(Deserialize)]
struct StaticConfig {
    #[serde(default)]
    sync: SyncConfig,
    upstream: UpstreamSettings,
    store: StoreSettings,
}

fn default_source_currencies() -> Vec<String> {
    [
        "AED", "AUD", "BRL", "CAD", "CHF", "CNY", "DKK", "EUR", "FJD", "GBP", "HHL", "HKD", "IDR",
        "INR", "ISK", "JPY", "KRW", "MXN", "MYR", "NOK", "NZD", "PLN", "RUB", "SEK", "SGD", "THB",
        "TRY", "TWD", "USD", "VND", "ZAR",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn default_target_currencies() -> Vec<String> {
    ["AUD", "EUR", "USD", "GBP"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_max_attempts() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    90
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_audit() -> bool {
    true
}

/// Loads a static YAML config file (no secrets) and injects the API key from the environment.
/// Any failure here is fatal: nothing has touched the network yet.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let static_conf: StaticConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let api_key = match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.trim().is_empty() => {
            info!("{API_KEY_ENV} found in env");
            key
        }
        Ok(_) => {
            error!("{API_KEY_ENV} is empty");
            anyhow::bail!("{API_KEY_ENV} environment variable is empty");
        }
        Err(e) => {
            error!(error = ?e, "{API_KEY_ENV} environment variable not set");
            return Err(anyhow::anyhow!("{API_KEY_ENV} environment variable not set: {e}"));
        }
    };

    if let Err(e) = static_conf.sync.validate() {
        error!(error = %e, "Sync configuration rejected");
        return Err(anyhow::anyhow!(e));
    }
    if static_conf.upstream.base_url.trim().is_empty() {
        anyhow::bail!("upstream.base_url must not be empty");
    }
    if static_conf.store.url.trim().is_empty() {
        anyhow::bail!("store.url must not be empty");
    }

    let upstream = UpstreamSettings {
        api_key,
        ..static_conf.upstream
    };
    static_conf.sync.trace_loaded();
    info!(
        upstream = %upstream.base_url,
        store = %static_conf.store.url,
        "Config loaded and merged successfully"
    );

    Ok(AppConfig {
        sync: static_conf.sync,
        upstream,
        store: static_conf.store,
    })
}
