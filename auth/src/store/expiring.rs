//! Bounded map with per-entry expiry.
//!
//! Entries are swept from the front of an insertion-order queue, so expiry
//! work is amortised over inserts instead of scanning the whole map.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// The map holds `capacity` live entries and cannot admit another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CapacityReached;

struct Slot<V> {
    value: V,
    expires_at: DateTime<Utc>,
    generation: u64,
}

pub(crate) struct ExpiringMap<K, V> {
    entries: HashMap<K, Slot<V>>,
    // Insertion order; an item is stale once its key was replaced or removed.
    order: VecDeque<(K, u64)>,
    capacity: usize,
    generation: u64,
}

impl<K: Eq + Hash + Clone, V> ExpiringMap<K, V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            generation: 0,
        }
    }

    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries held, including expired ones not yet swept.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn live_len(&self, now: DateTime<Utc>) -> usize {
        self.entries.values().filter(|slot| slot.expires_at > now).count()
    }

    pub(crate) fn contains(&self, key: &K, now: DateTime<Utc>) -> bool {
        self.entries.get(key).is_some_and(|slot| slot.expires_at > now)
    }

    /// Insert or replace `key`. A new key is refused while the map is full
    /// of live entries.
    pub(crate) fn insert(
        &mut self,
        key: K,
        value: V,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), CapacityReached> {
        self.sweep(now);

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            return Err(CapacityReached);
        }

        self.generation = self.generation.wrapping_add(1);
        self.order.push_back((key.clone(), self.generation));
        self.entries.insert(
            key,
            Slot {
                value,
                expires_at,
                generation: self.generation,
            },
        );

        if self.order.len() > self.capacity.saturating_mul(2) {
            self.compact();
        }
        Ok(())
    }

    /// Remove `key`, returning its value if it had not expired.
    pub(crate) fn take(&mut self, key: &K, now: DateTime<Utc>) -> Option<V> {
        self.entries
            .remove(key)
            .filter(|slot| slot.expires_at > now)
            .map(|slot| slot.value)
    }

    /// Drop expired entries from the front of the queue.
    ///
    /// Stops at the first live entry, so an entry inserted with a longer
    /// lifetime can shelter later ones until it expires.
    pub(crate) fn sweep(&mut self, now: DateTime<Utc>) {
        while let Some((key, generation)) = self.order.front() {
            match self.entries.get(key) {
                Some(slot) if slot.generation == *generation => {
                    if slot.expires_at > now {
                        break;
                    }
                    self.entries.remove(key);
                }
                _ => {}
            }
            self.order.pop_front();
        }
    }

    fn compact(&mut self) {
        let entries = &self.entries;
        self.order.retain(|(key, generation)| {
            entries
                .get(key)
                .is_some_and(|slot| slot.generation == *generation)
        });
    }
}
