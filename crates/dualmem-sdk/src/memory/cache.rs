//! Bounded TTL cache.
//!
//! Entries expire `ttl` after insertion and the oldest insertion is evicted
//! when the cache is full. Reads never refresh an entry.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
}

/// Capacity- and TTL-bounded map.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    slots: HashMap<K, Slot<V>>,
    capacity: usize,
    ttl: Duration,
    next_seq: u64,
}

impl<K: Eq + Hash + Clone, V> TtlCache<K, V> {
    /// A zero capacity is raised to 1. A zero TTL makes every entry expire
    /// immediately.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            slots: HashMap::new(),
            capacity: capacity.max(1),
            ttl,
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live value for `key`. An expired entry is dropped and reported as a miss.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let expired = match self.slots.get(key) {
            Some(slot) => slot.inserted_at.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            self.slots.remove(key);
            return None;
        }
        self.slots.get(key).map(|slot| &slot.value)
    }

    /// Insert or replace `key`, evicting the oldest insertion if full.
    pub fn insert(&mut self, key: K, value: V) {
        if !self.slots.contains_key(&key) && self.slots.len() >= self.capacity {
            self.purge_expired();
            if self.slots.len() >= self.capacity {
                self.evict_oldest();
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(
            key,
            Slot {
                value,
                inserted_at: Instant::now(),
                seq,
            },
        );
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.slots.remove(key).map(|slot| slot.value)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Entries held, expired ones included until they are purged.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every expired entry and return how many went.
    pub fn purge_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.inserted_at.elapsed() < ttl);
        before - self.slots.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .slots
            .iter()
            .min_by_key(|(_, slot)| slot.seq)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.slots.remove(&key);
        }
    }
}
