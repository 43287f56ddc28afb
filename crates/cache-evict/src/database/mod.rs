//! Eviction for database-table cache stores
//!
//! The cache table has `key`, `value` and `expiration` (Unix seconds)
//! columns and may be shared by several stores that differ only in key
//! prefix. Rows are walked with keyset pagination over `key`, in byte order,
//! and every delete re-checks expiration so rows refreshed mid-sweep survive.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlCacheTable;
pub use postgres::PgCacheTable;
pub use sqlite::SqliteCacheTable;

use crate::config::CacheConfig;
use crate::error::{EvictError, Result};
use crate::progress::ProgressSink;
use crate::strategy::EvictionStrategy;
use crate::types::{CacheRow, EvictionStats};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

const DEFAULT_BATCH_SIZE: u32 = 100;
const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(1);

/// Ordered range queries and conditional deletes over one cache table
#[async_trait]
pub trait CacheTable: Send + Sync {
    /// Number of rows whose key starts with `prefix`
    async fn count_prefixed(&self, prefix: &str) -> Result<u64>;

    /// Up to `limit` rows with `key > after` whose key starts with `prefix`,
    /// ascending by the byte value of `key`
    async fn next_batch(&self, prefix: &str, after: &str, limit: u32) -> Result<Vec<CacheRow>>;

    /// Delete those of `keys` still expired at `now`; returns rows affected
    async fn delete_expired(&self, keys: &[String], now: i64) -> Result<u64>;
}

/// Sweeps one prefix of a cache table in small keyset-paginated batches
pub struct DatabaseEvictionStrategy {
    store_name: String,
    table: Box<dyn CacheTable>,
    prefix: String,
    /// Prefixes of other stores nested inside ours; their keys are never touched
    excluded_prefixes: Vec<String>,
    batch_size: u32,
    batch_delay: Duration,
}

impl DatabaseEvictionStrategy {
    pub fn new(
        store_name: impl Into<String>,
        table: Box<dyn CacheTable>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store_name: store_name.into(),
            table,
            prefix: prefix.into(),
            excluded_prefixes: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }

    pub fn with_excluded_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.excluded_prefixes = prefixes;
        self
    }

    pub fn with_batching(mut self, batch_size: u32, batch_delay: Duration) -> Self {
        self.batch_size = batch_size.max(1);
        self.batch_delay = batch_delay;
        self
    }

    /// Registry constructor: connects lazily to the store's database
    pub fn construct(
        store_name: &str,
        config: &CacheConfig,
    ) -> Result<Box<dyn EvictionStrategy>> {
        let store = config.store(store_name)?;
        let table = open_table(store.connection_url()?, store.table_name()?)?;

        Ok(Box::new(
            Self::new(store_name, table, store.prefix.clone())
                .with_excluded_prefixes(config.nested_prefixes(store))
                .with_batching(config.batch_size, config.batch_delay),
        ))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn is_excluded(&self, key: &str) -> bool {
        self.excluded_prefixes
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
    }
}

#[async_trait]
impl EvictionStrategy for DatabaseEvictionStrategy {
    fn store_name(&self) -> &str {
        &self.store_name
    }

    async fn execute(&self, progress: &dyn ProgressSink) -> Result<EvictionStats> {
        let started = Instant::now();
        let mut stats = EvictionStats::default();

        info!(store = %self.store_name, prefix = %self.prefix, "Finding relevant cache records...");
        let total = self.table.count_prefixed(&self.prefix).await?;
        progress.report_total(total);

        // The bare prefix sorts before every key of this store
        let mut cursor = self.prefix.clone();
        loop {
            let batch = self
                .table
                .next_batch(&self.prefix, &cursor, self.batch_size)
                .await?;
            let last_key = match batch.last() {
                Some(row) => row.key.clone(),
                None => break,
            };
            if last_key.as_bytes() <= cursor.as_bytes() {
                error!(
                    store = %self.store_name,
                    cursor = %cursor,
                    last_key = %last_key,
                    "Key walk did not advance; stopping"
                );
                break;
            }
            progress.advance(batch.len() as u64);

            let now = Utc::now().timestamp();
            let candidates: Vec<String> = batch
                .into_iter()
                .filter(|row| row.is_expired(now) && !self.is_excluded(&row.key))
                .map(|row| row.key)
                .collect();

            if !candidates.is_empty() {
                let deleted = self.table.delete_expired(&candidates, now).await?;
                debug!(
                    store = %self.store_name,
                    candidates = candidates.len(),
                    deleted,
                    "Deleted expired batch"
                );
                stats.removed_count += deleted;
            }

            cursor = last_key;
            tokio::time::sleep(self.batch_delay).await;
        }

        stats.elapsed = started.elapsed();
        progress.report_final(&stats);
        Ok(stats)
    }
}

/// Open a lazily-connected cache table for a database URL
pub fn open_table(url: &str, table: &str) -> Result<Box<dyn CacheTable>> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let pool = PgPoolOptions::new().max_connections(2).connect_lazy(url)?;
        Ok(Box::new(PgCacheTable::new(pool, table)?))
    } else if url.starts_with("mysql://") {
        let pool = MySqlPoolOptions::new().max_connections(2).connect_lazy(url)?;
        Ok(Box::new(MySqlCacheTable::new(pool, table)?))
    } else if url.starts_with("sqlite:") {
        let pool = SqlitePoolOptions::new().max_connections(1).connect_lazy(url)?;
        Ok(Box::new(SqliteCacheTable::new(pool, table)?))
    } else {
        let scheme = url.split(':').next().unwrap_or(url);
        Err(EvictError::Config(format!(
            "unsupported cache database '{}'; expected postgres, mysql or sqlite",
            scheme
        )))
    }
}

/// Quote a table name, optionally schema-qualified, with `quote` after
/// checking it is a plain identifier
pub(crate) fn quote_table(name: &str, quote: char) -> Result<String> {
    let parts: Vec<&str> = name.split('.').collect();
    let valid = parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });

    if !valid {
        return Err(EvictError::Config(format!(
            "invalid cache table name: {:?}",
            name
        )));
    }

    Ok(parts
        .iter()
        .map(|part| format!("{}{}{}", quote, part, quote))
        .collect::<Vec<_>>()
        .join("."))
}
