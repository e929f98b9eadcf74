//! In-memory memoization of document fetches.
//!
//! Keyed by the full `FetchRequest` (URL, table filter and as-of), bounded by
//! entry count with least-recently-used eviction, and TTL-aware so current-feed
//! documents are eventually re-read. Concurrent requests for one key are
//! coalesced: the first caller downloads, the rest wait for its result. If the
//! leader fails the waiters retry on their own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::cancel::CancelToken;
use super::provider::{FetchRequest, SourceError, TableFetcher};
use crate::domain::RawTable;

const WAIT_SLICE: Duration = Duration::from_millis(50);

struct Entry {
    table: Arc<RawTable>,
    stored_at: Instant,
    last_used: u64,
}

/// A download in progress. `None` inside means the leader failed.
#[derive(Default)]
struct Flight {
    outcome: Mutex<Option<Option<Arc<RawTable>>>>,
    done: Condvar,
}

impl Flight {
    fn finish(&self, outcome: Option<Arc<RawTable>>) {
        *lock(&self.outcome) = Some(outcome);
        self.done.notify_all();
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<FetchRequest, Entry>,
    flights: HashMap<FetchRequest, Arc<Flight>>,
    tick: u64,
}

/// Counters for cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub downloads: u64,
    pub coalesced: u64,
    pub evictions: u64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded, TTL-aware, single-flight table cache.
pub struct FetchCache {
    state: Mutex<CacheState>,
    capacity: usize,
    ttl: Option<Duration>,
    hits: AtomicU64,
    downloads: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
}

enum Role {
    Hit(Arc<RawTable>),
    Wait(Arc<Flight>),
    Lead(Arc<Flight>),
}

/// A claimed flight. Dropping it unsettled (download error or panic) removes
/// the flight and wakes its waiters.
struct Lead<'a> {
    cache: &'a FetchCache,
    key: &'a FetchRequest,
    flight: Arc<Flight>,
    settled: bool,
}

impl Lead<'_> {
    fn succeed(mut self, table: &Arc<RawTable>) {
        self.cache.store(self.key, Arc::clone(table));
        self.flight.finish(Some(Arc::clone(table)));
        self.settled = true;
    }
}

impl Drop for Lead<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.cache.abandon(self.key);
            self.flight.finish(None);
        }
    }
}

impl FetchCache {
    /// `capacity` is clamped to at least one entry; `ttl = None` never expires.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            capacity: capacity.max(1),
            ttl,
            hits: AtomicU64::new(0),
            downloads: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.state).entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn is_fresh(&self, entry: &Entry) -> bool {
        self.ttl.map_or(true, |ttl| entry.stored_at.elapsed() < ttl)
    }

    fn claim(&self, key: &FetchRequest) -> Role {
        let mut state = lock(&self.state);
        state.tick += 1;
        let tick = state.tick;

        let fresh = state.entries.get(key).map(|e| self.is_fresh(e));
        match fresh {
            Some(true) => {
                if let Some(entry) = state.entries.get_mut(key) {
                    entry.last_used = tick;
                    return Role::Hit(Arc::clone(&entry.table));
                }
            }
            Some(false) => {
                state.entries.remove(key);
            }
            None => {}
        }

        if let Some(flight) = state.flights.get(key) {
            return Role::Wait(Arc::clone(flight));
        }

        let flight = Arc::new(Flight::default());
        state.flights.insert(key.clone(), Arc::clone(&flight));
        Role::Lead(flight)
    }

    fn store(&self, key: &FetchRequest, table: Arc<RawTable>) {
        let mut state = lock(&self.state);
        state.flights.remove(key);
        state.tick += 1;
        let tick = state.tick;
        state.entries.insert(
            key.clone(),
            Entry {
                table,
                stored_at: Instant::now(),
                last_used: tick,
            },
        );

        while state.entries.len() > self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    state.entries.remove(&k);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    fn abandon(&self, key: &FetchRequest) {
        lock(&self.state).flights.remove(key);
    }

    /// Return the cached table for `key`, or run `download` exactly once
    /// across concurrent callers and cache its success.
    pub fn get_or_fetch<F>(
        &self,
        key: &FetchRequest,
        cancel: &CancelToken,
        download: F,
    ) -> Result<Arc<RawTable>, SourceError>
    where
        F: FnOnce() -> Result<RawTable, SourceError>,
    {
        loop {
            cancel.check()?;
            match self.claim(key) {
                Role::Hit(table) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(table);
                }
                Role::Wait(flight) => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    let mut outcome = lock(&flight.outcome);
                    while outcome.is_none() {
                        cancel.check()?;
                        outcome = flight
                            .done
                            .wait_timeout(outcome, WAIT_SLICE)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0;
                    }
                    if let Some(Some(table)) = outcome.as_ref() {
                        return Ok(Arc::clone(table));
                    }
                    // leader failed: take the lead ourselves
                }
                Role::Lead(flight) => {
                    self.downloads.fetch_add(1, Ordering::Relaxed);
                    let lead = Lead {
                        cache: self,
                        key,
                        flight,
                        settled: false,
                    };
                    let table = Arc::new(download()?);
                    lead.succeed(&table);
                    return Ok(table);
                }
            }
        }
    }
}

/// A `TableFetcher` decorated with a `FetchCache`.
pub struct CachedFetcher<F> {
    inner: F,
    cache: FetchCache,
}

impl<F: TableFetcher> CachedFetcher<F> {
    pub fn new(inner: F, cache: FetchCache) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &FetchCache {
        &self.cache
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

impl<F: TableFetcher> TableFetcher for CachedFetcher<F> {
    fn fetch(&self, request: &FetchRequest, cancel: &CancelToken) -> Result<RawTable, SourceError> {
        let table = self
            .cache
            .get_or_fetch(request, cancel, || self.inner.fetch(request, cancel))?;
        Ok(RawTable::clone(&table))
    }
}
