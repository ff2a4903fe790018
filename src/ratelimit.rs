//! Sliding-window request limiter per (bucket, client)

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{LookupError, Result};
use crate::store::{Clock, KvStore};

const KEY_PREFIX: &str = "ratelimit:v1:";

/// Request timestamps (milliseconds) inside the trailing window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RateWindow {
    hits: Vec<i64>,
}

pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    // key -> millisecond timestamp at which its window is empty again; held
    // across load-prune-append so requests never interleave
    live: Mutex<HashMap<String, i64>>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            live: Mutex::new(HashMap::new()),
        }
    }

    fn key(bucket: &str, client: &str) -> String {
        format!("{KEY_PREFIX}{bucket}:{client}")
    }

    /// Admit one request if fewer than `limit` were admitted in the last
    /// `window_secs`. Storage failures let the request through.
    pub fn allow(&self, bucket: &str, client: &str, window_secs: u64, limit: usize) -> bool {
        self.admit(bucket, client, window_secs, limit).is_ok()
    }

    /// Like `allow`, but a denial is a `RateLimited` error with a retry hint
    pub fn check(&self, bucket: &str, client: &str, window_secs: u64, limit: usize) -> Result<()> {
        self.admit(bucket, client, window_secs, limit)
            .map_err(|retry_after| LookupError::rate_limited(bucket, Some(retry_after)))
    }

    /// `Err` carries seconds until the oldest hit leaves the window
    fn admit(&self, bucket: &str, client: &str, window_secs: u64, limit: usize) -> std::result::Result<(), u64> {
        let mut live = self.live.lock();
        let key = Self::key(bucket, client);
        let now = self.clock.now().timestamp_millis();
        let window_ms = i64::try_from(window_secs.saturating_mul(1000)).unwrap_or(i64::MAX);

        self.sweep(&mut live, now);

        let mut window = match self.store.get(&key) {
            Ok(Some(bytes)) => serde_json::from_slice::<RateWindow>(&bytes).unwrap_or_default(),
            Ok(None) => RateWindow::default(),
            Err(e) => {
                tracing::warn!(bucket = %bucket, error = %e, "Rate limit storage unavailable, allowing request");
                return Ok(());
            }
        };

        window.hits.retain(|&hit| now.saturating_sub(hit) < window_ms);

        if window.hits.len() >= limit {
            let oldest = window.hits.iter().copied().min().unwrap_or(now);
            let wait_ms = window_ms.saturating_sub(now.saturating_sub(oldest)).max(0);
            let retry_after = u64::try_from((wait_ms + 999) / 1000).unwrap_or(0).max(1);
            tracing::debug!(bucket = %bucket, client = %client, hits = window.hits.len(), "Rate limit reached");
            self.save(&key, bucket, &window);
            let newest = window.hits.iter().copied().max().unwrap_or(now);
            live.insert(key, newest.saturating_add(window_ms));
            return Err(retry_after);
        }

        window.hits.push(now);
        self.save(&key, bucket, &window);
        live.insert(key, now.saturating_add(window_ms));
        Ok(())
    }

    /// Drop stored windows whose every hit has aged out
    fn sweep(&self, live: &mut HashMap<String, i64>, now: i64) {
        live.retain(|key, empty_at| {
            if *empty_at > now {
                return true;
            }
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(key = %key, error = %e, "Failed to drop expired rate window");
            }
            false
        });
    }

    fn save(&self, key: &str, bucket: &str, window: &RateWindow) {
        let result = serde_json::to_vec(window)
            .map_err(LookupError::from)
            .and_then(|bytes| self.store.put(key, &bytes));
        if let Err(e) = result {
            tracing::warn!(bucket = %bucket, error = %e, "Failed to persist rate window");
        }
    }
}
