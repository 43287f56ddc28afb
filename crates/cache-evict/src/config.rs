//! Cache store configuration parsed from environment variables

use crate::error::{EvictError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TABLE: &str = "cache";
const DEFAULT_BATCH_SIZE: u32 = 100;
const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(1);

/// Configuration of one named cache store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub name: String,
    /// Backend kind, e.g. "file" or "database"
    pub driver: String,
    /// Root directory (file stores)
    pub path: Option<PathBuf>,
    /// Database URL (database stores)
    pub connection: Option<String>,
    /// Cache table (database stores)
    pub table: Option<String>,
    /// Prepended to every key of this store
    pub prefix: String,
}

impl StoreConfig {
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
            path: None,
            connection: None,
            table: None,
            prefix: String::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_connection(mut self, url: impl Into<String>) -> Self {
        self.connection = Some(url.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn root_path(&self) -> Result<&Path> {
        self.path
            .as_deref()
            .ok_or_else(|| self.missing("path"))
    }

    pub fn connection_url(&self) -> Result<&str> {
        self.connection
            .as_deref()
            .ok_or_else(|| self.missing("connection"))
    }

    pub fn table_name(&self) -> Result<&str> {
        self.table.as_deref().ok_or_else(|| self.missing("table"))
    }

    fn missing(&self, field: &str) -> EvictError {
        EvictError::Config(format!(
            "cache store '{}' has no {} configured",
            self.name, field
        ))
    }
}

/// All configured cache stores plus eviction tuning
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub stores: Vec<StoreConfig>,
    /// Rows fetched per keyset page
    pub batch_size: u32,
    /// Pause between database batches
    pub batch_delay: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stores: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }
}

impl CacheConfig {
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.stores.push(store);
        self
    }

    /// Parse configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse configuration from an arbitrary key lookup.
    ///
    /// Recognised keys: `CACHE_STORES`, `CACHE_PREFIX`,
    /// `CACHE_STORE_<NAME>_{DRIVER,PATH,CONNECTION,TABLE,PREFIX}`,
    /// `CACHE_EVICT_BATCH_SIZE` and `CACHE_EVICT_BATCH_DELAY_MS`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let global_prefix = lookup("CACHE_PREFIX").unwrap_or_default();

        let names: Vec<String> = lookup("CACHE_STORES")
            .map(|s| {
                s.split(',')
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut stores = Vec::with_capacity(names.len());
        for name in names {
            let var = |field: &str| lookup(&store_env_key(&name, field));

            let driver = var("DRIVER").ok_or_else(|| {
                EvictError::Config(format!(
                    "{} is required for cache store '{}'",
                    store_env_key(&name, "DRIVER"),
                    name
                ))
            })?;

            stores.push(StoreConfig {
                path: var("PATH").map(PathBuf::from),
                connection: var("CONNECTION"),
                table: Some(var("TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string())),
                prefix: var("PREFIX").unwrap_or_else(|| global_prefix.clone()),
                name,
                driver,
            });
        }

        let batch_size = match lookup("CACHE_EVICT_BATCH_SIZE") {
            Some(s) => s
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    EvictError::Config(format!("invalid CACHE_EVICT_BATCH_SIZE: {}", s))
                })?,
            None => DEFAULT_BATCH_SIZE,
        };

        let batch_delay = match lookup("CACHE_EVICT_BATCH_DELAY_MS") {
            Some(s) => s.parse::<u64>().map(Duration::from_millis).map_err(|_| {
                EvictError::Config(format!("invalid CACHE_EVICT_BATCH_DELAY_MS: {}", s))
            })?,
            None => DEFAULT_BATCH_DELAY,
        };

        Ok(Self {
            stores,
            batch_size,
            batch_delay,
        })
    }

    /// Look up a store by name; a missing store is a configuration error.
    pub fn store(&self, name: &str) -> Result<&StoreConfig> {
        self.stores
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| EvictError::Config(format!("cache store '{}' is not defined", name)))
    }

    /// Prefixes of other stores that live inside `store`'s key range on the
    /// same connection and table, i.e. strictly longer prefixes starting with
    /// `store.prefix`.
    pub fn nested_prefixes(&self, store: &StoreConfig) -> Vec<String> {
        self.stores
            .iter()
            .filter(|other| {
                other.name != store.name
                    && other.driver == store.driver
                    && other.connection == store.connection
                    && other.table == store.table
                    && other.prefix.len() > store.prefix.len()
                    && other.prefix.starts_with(&store.prefix)
            })
            .map(|other| other.prefix.clone())
            .collect()
    }
}

/// `CACHE_STORE_<NAME>_<FIELD>` with the name upper-cased and
/// non-alphanumerics mapped to `_`
pub fn store_env_key(store: &str, field: &str) -> String {
    let name: String = store
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("CACHE_STORE_{}_{}", name, field)
}
