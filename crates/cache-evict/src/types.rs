//! Core types for cache eviction

use serde::Serialize;
use std::time::Duration;

/// Outcome of a single eviction run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionStats {
    /// Entries actually removed (files unlinked or rows deleted)
    pub removed_count: u64,
    /// Best-effort byte total of removed entries; zero for database stores
    pub reclaimed_bytes: u64,
    /// Directories removed after their files were processed (file stores only)
    pub removed_directories: u64,
    /// Entries left in place because they could not be read or removed
    pub skipped: u64,
    pub elapsed: Duration,
}

/// A row of a cache table, as seen by the keyset walk.
///
/// The value column is never fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRow {
    pub key: String,
    pub expiration: i64,
}

impl CacheRow {
    pub fn new(key: impl Into<String>, expiration: i64) -> Self {
        Self {
            key: key.into(),
            expiration,
        }
    }

    /// Whether the row is expired at `now` (Unix seconds)
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiration <= now
    }
}
