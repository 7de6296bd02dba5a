//! Result Cache
//!
//! Optional read-through cache in front of execution, keyed by the canonical
//! JSON of the [`QuerySpec`]. Entries are written only with the
//! [`AcceptedSql`] that produced them, so SQL is validated once at write
//! time and never on read.

use crate::execution::QueryResult;
use crate::query_spec::QuerySpec;
use crate::validator::AcceptedSql;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

struct CacheEntry {
    result: QueryResult,
    stored_at: Instant,
}

pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, spec: &QuerySpec) -> Option<QueryResult> {
        let key = spec.cache_key();
        let fresh = {
            let entry = self.entries.get(&key)?;
            (entry.stored_at.elapsed() < self.ttl).then(|| entry.result.clone())
        };
        if fresh.is_none() {
            self.entries.remove(&key);
            debug!("Result cache entry expired");
        }
        fresh
    }

    /// `_accepted` ties the entry to SQL that passed the validator.
    /// Expired entries for other specs are dropped on every write.
    pub fn insert(&self, spec: &QuerySpec, _accepted: &AcceptedSql, result: QueryResult) {
        self.purge_expired();
        self.entries.insert(
            spec.cache_key(),
            CacheEntry {
                result,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged, "Purged expired result cache entries");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
