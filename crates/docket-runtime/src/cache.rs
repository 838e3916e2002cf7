//! Cohort statistics cache.
//!
//! Results are deterministic for a cohort key, so concurrent writers for
//! the same key are interchangeable and last write wins.

use moka::future::Cache;
use std::time::Duration;

use docket_core::{CohortKey, ComparisonStats};

use crate::config::StatsConfig;

pub struct StatsCache {
    cache: Cache<CohortKey, ComparisonStats>,
}

impl StatsCache {
    /// `ttl: None` keeps entries until capacity eviction.
    pub fn new(max_entries: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().max_capacity(max_entries);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            cache: builder.build(),
        }
    }

    pub fn from_config(config: &StatsConfig) -> Self {
        Self::new(config.cache_max_entries, config.cache_ttl)
    }

    pub async fn get(&self, key: &CohortKey) -> Option<ComparisonStats> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: CohortKey, stats: ComparisonStats) {
        self.cache.insert(key, stats).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate; moka applies writes lazily.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::from_config(&StatsConfig::default())
    }
}

impl std::fmt::Debug for StatsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsCache")
            .field("entries", &self.entry_count())
            .finish()
    }
}
