//! Expired-entry eviction for cache stores that do not prune themselves
//!
//! File caches are swept with a depth-first directory walk that reads only
//! the expiry header of each file. Database caches are swept with keyset
//! pagination over the key column, re-checking expiration at delete time.
//! Backends that already expire entries natively (Redis, Memcached) are
//! refused by the [`StrategyRegistry`].

pub mod config;
pub mod database;
pub mod error;
pub mod file;
pub mod progress;
pub mod registry;
pub mod strategy;
pub mod types;

pub use config::{CacheConfig, StoreConfig};
pub use database::{
    CacheTable, DatabaseEvictionStrategy, MySqlCacheTable, PgCacheTable, SqliteCacheTable,
};
pub use error::{EvictError, Result};
pub use file::{CacheFiles, DirItem, EntryKind, FileEvictionStrategy, LocalFiles};
pub use progress::{LogProgress, NoProgress, ProgressSink};
pub use registry::{
    StrategyConstructor, StrategyRegistry, DRIVER_DATABASE, DRIVER_FILE, DRIVER_MEMCACHED,
    DRIVER_REDIS,
};
pub use strategy::EvictionStrategy;
pub use types::{CacheRow, EvictionStats};
