//! Selection of eviction strategies by cache driver
//!
//! The registry is an explicit value rather than process-wide state: build
//! one with [`StrategyRegistry::new`] (or [`StrategyRegistry::standard`]) and
//! pass it to whoever resolves stores.

use crate::config::CacheConfig;
use crate::database::DatabaseEvictionStrategy;
use crate::error::{EvictError, Result};
use crate::file::FileEvictionStrategy;
use crate::strategy::EvictionStrategy;
use std::collections::{HashMap, HashSet};
use tracing::warn;

pub const DRIVER_FILE: &str = "file";
pub const DRIVER_DATABASE: &str = "database";
pub const DRIVER_MEMCACHED: &str = "memcached";
pub const DRIVER_REDIS: &str = "redis";

/// Builds a strategy for the named store out of the cache configuration
pub type StrategyConstructor =
    fn(store_name: &str, config: &CacheConfig) -> Result<Box<dyn EvictionStrategy>>;

/// Maps cache driver kinds to "refused" or to a strategy constructor
pub struct StrategyRegistry {
    strategies: HashMap<String, StrategyConstructor>,
    refused: HashSet<String>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    /// Registry holding only the built-ins: `memcached` and `redis` refused,
    /// `file` bound to [`FileEvictionStrategy`].
    pub fn new() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
            refused: HashSet::new(),
        };
        registry.install_builtins();
        registry
    }

    /// Built-ins plus the `database` driver
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register_strategy(DRIVER_DATABASE, DatabaseEvictionStrategy::construct);
        registry
    }

    /// Forget every registration and reinstall the built-ins
    pub fn reset(&mut self) {
        self.strategies.clear();
        self.refused.clear();
        self.install_builtins();
    }

    fn install_builtins(&mut self) {
        self.register_refused(DRIVER_MEMCACHED);
        self.register_refused(DRIVER_REDIS);
        self.register_strategy(DRIVER_FILE, FileEvictionStrategy::construct);
    }

    /// Mark a driver as evicting its own expired keys. Idempotent; a kind
    /// that already has a strategy stays bound.
    ///
    /// Returns whether the kind is now refused.
    pub fn register_refused(&mut self, kind: &str) -> bool {
        if self.strategies.contains_key(kind) {
            warn!(kind, "Driver already has an eviction strategy; not marking it as refused");
            return false;
        }
        self.refused.insert(kind.to_string());
        true
    }

    /// Bind a driver to a strategy constructor. The first binding for a kind
    /// wins; later ones, and bindings for refused kinds, are ignored.
    ///
    /// Returns whether `constructor` was bound.
    pub fn register_strategy(&mut self, kind: &str, constructor: StrategyConstructor) -> bool {
        if self.refused.contains(kind) {
            warn!(kind, "Driver evicts by itself; ignoring strategy registration");
            return false;
        }
        if self.strategies.contains_key(kind) {
            warn!(kind, "Driver already has an eviction strategy; ignoring registration");
            return false;
        }
        self.strategies.insert(kind.to_string(), constructor);
        true
    }

    pub fn is_refused(&self, kind: &str) -> bool {
        self.refused.contains(kind)
    }

    pub fn has_strategy(&self, kind: &str) -> bool {
        self.strategies.contains_key(kind)
    }

    /// Resolve the eviction strategy for `store_name` using driver `kind`.
    ///
    /// Fails with [`EvictError::Refused`] when the driver evicts by itself.
    /// Returns `Ok(None)` when no strategy is known for the driver.
    pub fn resolve(
        &self,
        store_name: &str,
        kind: &str,
        config: &CacheConfig,
    ) -> Result<Option<Box<dyn EvictionStrategy>>> {
        if self.refused.contains(kind) {
            return Err(EvictError::Refused(kind.to_string()));
        }

        match self.strategies.get(kind) {
            Some(construct) => construct(store_name, config).map(Some),
            None => Ok(None),
        }
    }
}
