//! cache-evict - remove expired entries from file and database cache stores
//!
//! Stores are described by `CACHE_STORE_<NAME>_*` environment variables;
//! `CACHE_EVICT_TARGETS` picks which ones to sweep (default: all).

use cache_evict::{
    CacheConfig, EvictError, LogProgress, Result, StoreConfig, StrategyRegistry,
};
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env().add_directive("cache_evict=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    let config = CacheConfig::from_env()?;
    let targets = select_targets(&config, std::env::var("CACHE_EVICT_TARGETS").ok())?;
    if targets.is_empty() {
        return Err(EvictError::Config(
            "no cache stores configured; set CACHE_STORES".to_string(),
        ));
    }

    let registry = StrategyRegistry::standard();

    // Resolve everything up front so a refused or unknown driver stops the
    // run before anything is deleted
    let mut strategies = Vec::with_capacity(targets.len());
    for store in &targets {
        match registry.resolve(&store.name, &store.driver, &config) {
            Ok(Some(strategy)) => strategies.push(strategy),
            Ok(None) => {
                error!(store = %store.name, driver = %store.driver, "No eviction strategy for cache driver");
                return Err(EvictError::Config(format!(
                    "no eviction strategy for cache driver '{}' (store '{}')",
                    store.driver, store.name
                )));
            }
            Err(e) => {
                error!(store = %store.name, error = %e, "Cannot evict cache store");
                return Err(e);
            }
        }
    }

    for strategy in strategies {
        info!(store = %strategy.store_name(), "Evicting expired cache entries...");
        let progress = LogProgress::new(strategy.store_name());
        let stats = strategy.execute(&progress).await?;
        info!(
            store = %strategy.store_name(),
            stats = %serde_json::to_string(&stats).unwrap_or_default(),
            "Expired cache entries evicted"
        );
    }

    Ok(())
}

/// Stores named in `targets` (comma-separated), or every configured store
fn select_targets(config: &CacheConfig, targets: Option<String>) -> Result<Vec<StoreConfig>> {
    let names: Vec<String> = match targets {
        Some(list) => list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => return Ok(config.stores.clone()),
    };

    names
        .iter()
        .map(|name| config.store(name).cloned())
        .collect()
}
