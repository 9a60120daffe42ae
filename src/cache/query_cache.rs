//! # Partitioned Single-Flight Query Cache
//!
//! Memoizes engine outputs as serialized JSON.
//!
//! ## Layout
//!
//! Two LRU levels: realm partitions (bounded by `max_realms`), each holding up
//! to `entries_per_realm` entries. Evicting a partition drops all of its
//! entries at once.
//!
//! ## Single flight
//!
//! The first caller for a missing key becomes the leader and runs the
//! computation. Later callers subscribe to the leader's `watch` channel and get
//! its outcome, success or failure. If the leader is dropped before finishing,
//! its slot is released and one waiter takes over.
//!
//! ## Invalidation
//!
//! `invalidate` removes the partition and forgets every in-flight computation of
//! that partition. A leader stores its result only if its slot is still
//! registered, so work started before the invalidation is never cached.

use super::{CacheKey, PartitionIndex};
use crate::error::CoreError;
use crate::governance::Address;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Values the cache can hold.
pub trait CacheValue: Serialize + DeserializeOwned + Send {
    /// Chain slot the value was derived at.
    fn source_slot(&self) -> u64;
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_realms: usize,
    pub entries_per_realm: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            max_realms: 256,
            entries_per_realm: 128,
        }
    }
}

/// Per-lookup freshness requirements.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub ttl: Duration,
    /// Entries fetched before this instant count as misses.
    pub not_before: Option<DateTime<Utc>>,
}

impl CachePolicy {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            not_before: None,
        }
    }

    pub fn not_before(mut self, not_before: Option<DateTime<Utc>>) -> Self {
        self.not_before = not_before;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Arc<[u8]>,
    pub fetched_at: DateTime<Utc>,
    pub slot: u64,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_usable(&self, now: Instant, policy: &CachePolicy) -> bool {
        self.expires_at > now && policy.not_before.is_none_or(|t| self.fetched_at >= t)
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub computations: u64,
    pub coalesced: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub partitions: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

type Outcome = Option<Result<CacheEntry, CoreError>>;

struct InFlight {
    id: u64,
    rx: watch::Receiver<Outcome>,
}

struct State {
    partitions: LruCache<Address, LruCache<CacheKey, CacheEntry>>,
    in_flight: HashMap<CacheKey, InFlight>,
}

enum Role {
    Hit(CacheEntry),
    Wait(watch::Receiver<Outcome>),
    Lead(u64, watch::Sender<Outcome>),
}

pub struct QueryCache {
    config: CacheConfig,
    state: Mutex<State>,
    index: PartitionIndex,
    counters: Counters,
    next_flight: AtomicU64,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        let partitions = LruCache::new(non_zero(config.max_realms));
        let index = PartitionIndex::new(config.max_realms.saturating_mul(config.entries_per_realm));
        Self {
            config,
            state: Mutex::new(State {
                partitions,
                in_flight: HashMap::new(),
            }),
            index,
            counters: Counters::default(),
            next_flight: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Default policy: configured TTL, no freshness floor.
    pub fn policy(&self) -> CachePolicy {
        CachePolicy::ttl(self.config.ttl)
    }

    /// Subject-to-realm map consulted by invalidation.
    pub fn index(&self) -> &PartitionIndex {
        &self.index
    }

    /// Record that `subjects` belong to `realm`, so invalidating the realm also
    /// drops their entries. A subject the bounded index has to forget loses its
    /// entries right away, since no invalidation could reach them any more.
    pub fn assign(&self, subjects: impl IntoIterator<Item = Address>, realm: Address) {
        let dropped = self.index.record_all(subjects, realm);
        if dropped.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        for subject in &dropped {
            if let Some(entries) = state.partitions.pop(subject) {
                self.counters
                    .evictions
                    .fetch_add(entries.len() as u64, Ordering::Relaxed);
            }
        }
        state
            .in_flight
            .retain(|key, _| !dropped.contains(&key.partition));
        drop(state);
        debug!("index full, forgot {} subject(s) of realm {}", dropped.len(), realm);
    }

    /// Return the cached value for `key`, or run `compute` once for all
    /// concurrent callers and cache its success.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: CacheKey,
        policy: CachePolicy,
        compute: F,
    ) -> Result<T, CoreError>
    where
        T: CacheValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let (id, tx) = loop {
            match self.acquire(&key, &policy) {
                Role::Hit(entry) => {
                    trace!("cache hit {}", key);
                    return decode(&entry);
                }
                Role::Wait(mut rx) => {
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    trace!("waiting on in-flight {}", key);
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(outcome) => outcome.clone(),
                        // Leader went away without an outcome; compete again.
                        Err(_) => continue,
                    };
                    match outcome {
                        Some(Ok(entry)) => return decode(&entry),
                        Some(Err(e)) => return Err(e),
                        None => continue,
                    }
                }
                Role::Lead(id, tx) => break (id, tx),
            }
        };

        let mut guard = FlightGuard {
            cache: self,
            key: &key,
            id,
            armed: true,
        };
        self.counters.computations.fetch_add(1, Ordering::Relaxed);
        debug!("computing {}", key);

        let result = compute().await;
        let outcome = match &result {
            Ok(value) => serde_json::to_vec(value)
                .map(|bytes| CacheEntry {
                    payload: Arc::from(bytes),
                    fetched_at: Utc::now(),
                    slot: value.source_slot(),
                    expires_at: Instant::now() + policy.ttl,
                })
                .map_err(CoreError::from),
            Err(e) => Err(e.clone()),
        };

        {
            let mut state = self.state.lock();
            let still_current = state.in_flight.get(&key).is_some_and(|f| f.id == id);
            if still_current {
                state.in_flight.remove(&key);
                if let Ok(entry) = &outcome {
                    self.store(&mut state, key.clone(), entry.clone());
                }
            } else {
                debug!("{} invalidated while computing, result not cached", key);
            }
        }
        guard.armed = false;
        let _ = tx.send(Some(outcome.clone()));

        match (result, outcome) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(e)) | (Err(e), _) => Err(e),
        }
    }

    /// Drop every entry of `realm`, and of every subject known to belong to it.
    pub fn invalidate(&self, realm: &Address) {
        let mut partitions = self.index.subjects_of(realm);
        partitions.push(*realm);

        let mut state = self.state.lock();
        for partition in &partitions {
            state.partitions.pop(partition);
        }
        state
            .in_flight
            .retain(|key, _| !partitions.contains(&key.partition));
        drop(state);

        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!("invalidated realm {} ({} partitions)", realm, partitions.len());
    }

    /// Drop every entry and forget all in-flight computations.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.partitions.clear();
        state.in_flight.clear();
        drop(state);

        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!("cleared query cache");
    }

    pub fn stats(&self) -> CacheStats {
        let partitions = self.state.lock().partitions.len();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            partitions,
        }
    }

    fn acquire(&self, key: &CacheKey, policy: &CachePolicy) -> Role {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(partition) = state.partitions.get_mut(&key.partition) {
            match partition.get(key) {
                Some(entry) if entry.is_usable(now, policy) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Role::Hit(entry.clone());
                }
                Some(_) => {
                    partition.pop(key);
                }
                None => {}
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        if let Some(flight) = state.in_flight.get(key) {
            // A closed channel means the leader is gone and its guard is about
            // to release the slot; take it over now.
            if flight.rx.has_changed().is_ok() {
                return Role::Wait(flight.rx.clone());
            }
        }

        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        state.in_flight.insert(key.clone(), InFlight { id, rx });
        Role::Lead(id, tx)
    }

    fn store(&self, state: &mut State, key: CacheKey, entry: CacheEntry) {
        let partition_key = key.partition;
        if !state.partitions.contains(&partition_key) {
            let partition = LruCache::new(non_zero(self.config.entries_per_realm));
            if let Some((evicted, entries)) = state.partitions.push(partition_key, partition) {
                if evicted != partition_key {
                    self.counters
                        .evictions
                        .fetch_add(entries.len() as u64, Ordering::Relaxed);
                    debug!("evicted partition {} ({} entries)", evicted, entries.len());
                }
            }
        }
        if let Some(partition) = state.partitions.get_mut(&partition_key) {
            if let Some((evicted, _)) = partition.push(key.clone(), entry) {
                if evicted != key {
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn release(&self, key: &CacheKey, id: u64) {
        let mut state = self.state.lock();
        if state.in_flight.get(key).is_some_and(|f| f.id == id) {
            state.in_flight.remove(key);
        }
    }
}

/// Releases the leader's slot if the computation is dropped mid-way.
struct FlightGuard<'a> {
    cache: &'a QueryCache,
    key: &'a CacheKey,
    id: u64,
    armed: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!("computation of {} abandoned", self.key);
        self.cache.release(self.key, self.id);
    }
}

fn decode<T: DeserializeOwned>(entry: &CacheEntry) -> Result<T, CoreError> {
    Ok(serde_json::from_slice(&entry.payload)?)
}

fn non_zero(value: usize) -> NonZeroUsize {
    NonZeroUsize::new(value).unwrap_or(NonZeroUsize::MIN)
}
