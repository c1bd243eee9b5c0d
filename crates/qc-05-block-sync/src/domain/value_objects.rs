//! Value objects backing the admission pipeline.

use parking_lot::{Mutex, RwLock};
use shared_types::{Hash, PeerId};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Content hashes of recently admitted messages (deduplication).
///
/// Cleared wholesale when full and on a fixed period; there is no per-entry
/// eviction.
pub struct ReceivedMessageCache {
    hashes: RwLock<HashSet<Hash>>,
    max_size: usize,
    period: Duration,
    last_clean: Mutex<Instant>,
}

impl ReceivedMessageCache {
    pub fn new(max_size: usize, period: Duration) -> Self {
        Self {
            hashes: RwLock::new(HashSet::with_capacity(max_size)),
            max_size,
            period,
            last_clean: Mutex::new(Instant::now()),
        }
    }

    /// Clears the cache if the period elapsed since the last clear.
    pub fn clean_expired(&self, now: Instant) -> bool {
        let mut last_clean = self.last_clean.lock();
        if now.saturating_duration_since(*last_clean) < self.period {
            return false;
        }
        self.hashes.write().clear();
        *last_clean = now;
        true
    }

    /// Check if a message hash has been seen.
    pub fn has_seen(&self, hash: &Hash) -> bool {
        self.hashes.read().contains(hash)
    }

    /// Records `hash`, returning `false` if it was already present.
    pub fn insert_if_new(&self, hash: Hash) -> bool {
        let mut hashes = self.hashes.write();
        if hashes.contains(&hash) {
            return false;
        }
        if hashes.len() >= self.max_size {
            hashes.clear();
        }
        hashes.insert(hash);
        true
    }

    pub fn len(&self) -> usize {
        self.hashes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.read().is_empty()
    }
}

/// Per-peer count of admitted, not yet processed messages.
#[derive(Default)]
pub struct MessageCounter {
    counts: Mutex<HashMap<PeerId, usize>>,
}

impl MessageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer: &PeerId) -> usize {
        self.counts.lock().get(peer).copied().unwrap_or(0)
    }

    pub fn increment(&self, peer: &PeerId) {
        *self.counts.lock().entry(*peer).or_insert(0) += 1;
    }

    /// Decrements, dropping the entry when it reaches zero.
    pub fn decrement(&self, peer: &PeerId) {
        let mut counts = self.counts.lock();
        if let Some(count) = counts.get_mut(peer) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(peer);
            }
        }
    }

    pub fn tracked_peers(&self) -> usize {
        self.counts.lock().len()
    }
}
