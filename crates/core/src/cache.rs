//! Keyed cache with fetch deduplication.
//!
//! At most one fetch per key is in flight at any time. Concurrent callers for
//! a key that is being fetched await the same shared future instead of
//! starting their own request, and every waiter observes the same outcome.
//! Successful values are kept until evicted; failures are never stored.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use livebus_transit::Result;
use tracing::debug;

type PendingFetch<V> = Shared<BoxFuture<'static, Result<V>>>;

enum Slot<V> {
    Ready {
        value: V,
        stored_at: DateTime<Utc>,
    },
    Pending {
        generation: u64,
        fetch: PendingFetch<V>,
    },
}

/// Counters for monitoring how often the cache saves a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from a stored value
    pub hits: u64,
    /// Lookups that joined a fetch already in flight
    pub coalesced: u64,
    /// Producer invocations
    pub fetches: u64,
    pub failures: u64,
}

pub struct SingleFlightCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    stats: Mutex<CacheStats>,
    next_generation: AtomicU64,
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Clone + Debug + Eq + Hash,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Returns the stored value for `key`, joins the fetch in flight, or
    /// starts a new fetch through `producer`.
    ///
    /// `producer` is only called when neither a value nor a pending fetch
    /// exists. A fetch started here keeps running for the other waiters even
    /// if this caller stops polling.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, producer: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (generation, fetch) = {
            let mut slots = self.slots();
            match slots.get(&key) {
                Some(Slot::Ready { value, .. }) => {
                    self.record(|stats| stats.hits += 1);
                    return Ok(value.clone());
                }
                Some(Slot::Pending { generation, fetch }) => {
                    self.record(|stats| stats.coalesced += 1);
                    debug!(key = ?key, "Joining fetch in flight");
                    (*generation, fetch.clone())
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let fetch = producer().boxed().shared();
                    slots.insert(
                        key.clone(),
                        Slot::Pending {
                            generation,
                            fetch: fetch.clone(),
                        },
                    );
                    self.record(|stats| stats.fetches += 1);
                    debug!(key = ?key, "Cache miss, fetching");
                    (generation, fetch)
                }
            }
        };

        let outcome = fetch.await;
        self.settle(&key, generation, &outcome);
        outcome
    }

    // Every waiter settles; only the first one that still finds its own
    // pending slot writes. A slot evicted mid-flight stays evicted.
    fn settle(&self, key: &K, generation: u64, outcome: &Result<V>) {
        let mut slots = self.slots();
        let still_pending = matches!(
            slots.get(key),
            Some(Slot::Pending { generation: current, .. }) if *current == generation
        );
        if !still_pending {
            return;
        }

        match outcome {
            Ok(value) => {
                slots.insert(
                    key.clone(),
                    Slot::Ready {
                        value: value.clone(),
                        stored_at: Utc::now(),
                    },
                );
            }
            Err(error) => {
                slots.remove(key);
                self.record(|stats| stats.failures += 1);
                debug!(key = ?key, error = %error, "Fetch failed, not cached");
            }
        }
    }

    /// The stored value, without fetching.
    pub fn get(&self, key: &K) -> Option<V> {
        match self.slots().get(key) {
            Some(Slot::Ready { value, .. }) => Some(value.clone()),
            _ => None,
        }
    }

    /// When the stored value for `key` was written.
    pub fn stored_at(&self, key: &K) -> Option<DateTime<Utc>> {
        match self.slots().get(key) {
            Some(Slot::Ready { stored_at, .. }) => Some(*stored_at),
            _ => None,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        matches!(self.slots().get(key), Some(Slot::Pending { .. }))
    }

    /// Removes `key`, forcing the next lookup to fetch again. A fetch in
    /// flight still resolves for its waiters but is not stored.
    pub fn evict(&self, key: &K) -> bool {
        self.slots().remove(key).is_some()
    }

    /// Removes every entry except `keep`. Returns the number removed.
    pub fn evict_all_except(&self, keep: &K) -> usize {
        self.retain(|key| key == keep)
    }

    /// Keeps only the entries whose key satisfies `keep`. Returns the number
    /// removed.
    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|key, _| keep(key));
        let removed = before - slots.len();
        if removed > 0 {
            debug!(removed, remaining = slots.len(), "Evicted cache entries");
        }
        removed
    }

    pub fn clear(&self) {
        self.slots().clear();
    }

    /// Number of entries, stored or pending.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl<K, V> Default for SingleFlightCache<K, V>
where
    K: Clone + Debug + Eq + Hash,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
