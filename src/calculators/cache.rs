//! Per-game data cache shared by the calculator implementations.
//!
//! Written during prefetch (or a single on-demand load) and read during
//! calculation. Entries are reference-counted so readers never hold a
//! map guard across an await. Concurrent misses on one game share a
//! single on-demand load.

use anyhow::{Context, Result};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::CacheStats;
use crate::types::GameId;

pub struct GameCache<T> {
    entries: DashMap<GameId, Arc<T>>,
    /// One lock per game being loaded on demand.
    loading: DashMap<GameId, Arc<Mutex<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    on_demand_loads: AtomicU64,
}

impl<T> GameCache<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            loading: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            on_demand_loads: AtomicU64::new(0),
        }
    }

    /// Distinct ids from `esbids` that are not cached yet, ascending.
    pub fn missing(&self, esbids: &[GameId]) -> Vec<GameId> {
        esbids
            .iter()
            .copied()
            .filter(|id| !self.entries.contains_key(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn insert(&self, esbid: GameId, value: T) {
        self.entries.insert(esbid, Arc::new(value));
    }

    /// Look up a game, counting the hit or miss.
    pub fn get(&self, esbid: GameId) -> Option<Arc<T>> {
        match self.entries.get(&esbid) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(entry.value()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Look up without touching the counters (used after an on-demand load).
    pub fn peek(&self, esbid: GameId) -> Option<Arc<T>> {
        self.entries.get(&esbid).map(|e| Arc::clone(e.value()))
    }

    /// Return the cached game, running `load` on a miss. `load` must insert
    /// `esbid`. Callers racing on the same miss wait for the first load
    /// instead of issuing their own.
    pub async fn get_or_load<F>(&self, esbid: GameId, load: F) -> Result<Arc<T>>
    where
        F: Future<Output = Result<()>>,
    {
        if let Some(entry) = self.get(esbid) {
            return Ok(entry);
        }
        let lock = Arc::clone(self.loading.entry(esbid).or_default().value());
        let _guard = lock.lock().await;
        if let Some(entry) = self.peek(esbid) {
            return Ok(entry);
        }
        load.await?;
        self.record_on_demand_load();
        self.peek(esbid)
            .with_context(|| format!("Game {esbid} missing after load"))
    }

    pub fn record_on_demand_load(&self) {
        self.on_demand_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn contains(&self, esbid: GameId) -> bool {
        self.entries.contains_key(&esbid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.loading.clear();
    }

    /// Snapshot the counters; `rows` reports how many raw rows an entry holds.
    pub fn stats(&self, rows: impl Fn(&T) -> usize) -> CacheStats {
        CacheStats {
            games_cached: self.entries.len(),
            rows_cached: self.entries.iter().map(|e| rows(e.value())).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            on_demand_loads: self.on_demand_loads.load(Ordering::Relaxed),
        }
    }
}

impl<T> Default for GameCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
