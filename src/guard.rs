//! Replay guard: local, advisory deduplication of lock events.
//!
//! Keyed by (recipient, nonce). Membership is checked and inserted under a
//! single lock, so two concurrent deliveries of the same key cannot both
//! pass. The destination's nonce registry is the authoritative defense;
//! this only keeps redundant deliveries off the submission path.
//!
//! ## Memory
//!
//! - Each entry is ~60 bytes (20-byte recipient + 32-byte nonce + 8-byte Instant),
//!   so the default 100k entries ≈ 6 MB.
//! - When full, the oldest entry is evicted. An evicted key can be forwarded
//!   again; the destination rejects it with `DuplicateNonce`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::GuardKey;

pub const DEFAULT_GUARD_CACHE_SIZE: usize = 100_000;
pub const DEFAULT_GUARD_TTL_SECS: u64 = 86_400; // 24 hours

/// Bounded, TTL'd set of dispatched (recipient, nonce) keys
pub struct ReplayGuard {
    inner: Mutex<HashMap<GuardKey, Instant>>,
    max_size: usize,
    ttl: Duration,
}

impl ReplayGuard {
    pub fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            max_size: max_size.max(1),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Atomically insert `key` if absent.
    ///
    /// Returns `true` when the key was newly inserted (the caller owns
    /// forwarding it), `false` when it was already present.
    pub fn check_and_insert(&self, key: GuardKey) -> bool {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if map
            .get(&key)
            .is_some_and(|&t| now.duration_since(t) < self.ttl)
        {
            return false;
        }

        if map.len() >= self.max_size {
            map.retain(|_, &mut t| now.duration_since(t) < self.ttl);
        }
        while map.len() >= self.max_size && !map.is_empty() {
            let oldest = map.iter().min_by_key(|(_, t)| **t).map(|(k, _)| *k);
            if let Some(k) = oldest {
                map.remove(&k);
            } else {
                break;
            }
        }

        map.insert(key, now);
        true
    }

    pub fn contains(&self, key: &GuardKey) -> bool {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(key).is_some_and(|&t| t.elapsed() < self.ttl)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(DEFAULT_GUARD_CACHE_SIZE, DEFAULT_GUARD_TTL_SECS)
    }
}
