//! The eviction strategy abstraction

use crate::error::Result;
use crate::progress::ProgressSink;
use crate::types::EvictionStats;
use async_trait::async_trait;

/// Backend-specific algorithm that finds and removes expired entries of one
/// cache store.
///
/// Each call to [`execute`](EvictionStrategy::execute) is an independent,
/// sequential sweep with fresh stats. Running it again without intervening
/// writes removes nothing further.
#[async_trait]
pub trait EvictionStrategy: Send + Sync {
    /// Name of the cache store this strategy sweeps
    fn store_name(&self) -> &str;

    /// Sweep the store once, removing every entry expired at delete time.
    async fn execute(&self, progress: &dyn ProgressSink) -> Result<EvictionStats>;
}
