//! Result cache for resolved records

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{is_fresh, Clock, KvStore};
use crate::types::{CanonicalRecord, Resolution, Target};

const KEY_PREFIX: &str = "record:v1:";

/// What gets persisted per target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub target: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub stored_at: DateTime<Utc>,
    pub record: CanonicalRecord,
}

/// TTL cache over the shared store. Storage problems degrade to cache misses.
pub struct ResultCache {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn key(target: &Target) -> String {
        format!("{KEY_PREFIX}{}", target.value)
    }

    /// Fresh entry for `target`, if any
    pub fn get(&self, target: &Target) -> Option<Resolution> {
        let key = Self::key(target);
        let bytes = match self.store.get(&key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "Cache read failed");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "Discarding unreadable cache entry");
                return None;
            }
        };

        // keys are plain strings, so guard against a different target landing here
        if entry.target != target.value {
            return None;
        }

        if !is_fresh(entry.stored_at, self.clock.now(), self.ttl) {
            tracing::debug!(target = %target, stored_at = %entry.stored_at, "Cache entry expired");
            return None;
        }

        Some(Resolution {
            record: entry.record,
            from_cache: true,
            cached_at: entry.stored_at,
        })
    }

    /// Store a successful record, replacing whatever was there. Returns the
    /// stored-at timestamp.
    pub fn put(&self, target: &Target, record: &CanonicalRecord) -> DateTime<Utc> {
        let entry = CacheEntry {
            target: target.value.clone(),
            stored_at: self.clock.now(),
            record: record.clone(),
        };

        match serde_json::to_vec(&entry) {
            Ok(bytes) => {
                if let Err(e) = self.store.put(&Self::key(target), &bytes) {
                    tracing::warn!(target = %target, error = %e, "Cache write failed");
                }
            }
            Err(e) => tracing::warn!(target = %target, error = %e, "Cache entry could not be encoded"),
        }
        entry.stored_at
    }

    pub fn invalidate(&self, target: &Target) {
        if let Err(e) = self.store.remove(&Self::key(target)) {
            tracing::warn!(target = %target, error = %e, "Cache invalidation failed");
        }
    }
}
