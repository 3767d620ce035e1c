//! Time-bounded cache for extraction results.
//!
//! Entries are fresh for `ttl` after they were stored. Reads enforce the TTL
//! themselves (a stale entry is removed on sight), and a background sweeper
//! reclaims entries nobody reads again. The sweeper is started by the first
//! read, parks itself once the cache is empty, and is restarted by the next
//! read after that. An atomic flag guarantees at most one sweeper at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ytdlp::ExtractionResult;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Sweep period as a multiple of the TTL.
const SWEEP_FACTOR: u32 = 4;

/// Floor for the sweep period so a zero interval cannot spin the sweeper.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl CacheConfig {
    /// TTL with the default sweep period of four TTLs, saturating on
    /// overflow.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            sweep_interval: ttl.checked_mul(SWEEP_FACTOR).unwrap_or(Duration::MAX),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

struct Entry<V> {
    value: Arc<V>,
    stored_at: Instant,
}

/// String-keyed cache whose values expire after a fixed TTL.
pub struct ExpiringCache<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    config: CacheConfig,
    sweeping: AtomicBool,
    sweepers_started: AtomicUsize,
    shutdown: CancellationToken,
}

/// Cache of `yt-dlp` results keyed by resource URL.
pub type ExtractionCache = ExpiringCache<ExtractionResult>;

impl<V: Send + Sync + 'static> ExpiringCache<V> {
    pub fn new(config: CacheConfig) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            config,
            sweeping: AtomicBool::new(false),
            sweepers_started: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Returns the value stored under `key` if it is still fresh. A stale
    /// entry is deleted and reported as absent.
    pub fn get(self: &Arc<Self>, key: &str) -> Option<Arc<V>> {
        self.ensure_sweeper();

        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if self.is_fresh(entry, Instant::now()) => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
            }
        }

        // A writer may have refreshed the key between the two locks.
        let mut entries = self.entries.write();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if self.is_fresh(entry, now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                debug!(%key, "evicted stale cache entry on read");
                None
            }
            None => None,
        }
    }

    /// Inserts or replaces `key`, restarting its TTL.
    pub fn set(&self, key: impl Into<String>, value: Arc<V>) {
        let entry = Entry {
            value,
            stored_at: Instant::now(),
        };
        self.entries.write().insert(key.into(), entry);
    }

    /// Removes every stale entry and returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.sweep_entries(false).0
    }

    /// Number of stored entries, including stale ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether a background sweeper is currently scheduled.
    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::Acquire)
    }

    /// How many background sweepers have been started over the cache's life.
    pub fn sweepers_started(&self) -> usize {
        self.sweepers_started.load(Ordering::Acquire)
    }

    /// Stops the background sweeper for good. Reads keep enforcing the TTL.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn is_fresh(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.stored_at) < self.config.ttl
    }

    fn sweep_entries(&self, park_when_empty: bool) -> (usize, bool) {
        let mut entries = self.entries.write();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| self.is_fresh(entry, now));
        let removed = before - entries.len();
        let empty = entries.is_empty();
        if empty && park_when_empty {
            // Cleared while the write lock is held so no entry can slip in
            // between the emptiness check and the flag reset.
            self.sweeping.store(false, Ordering::Release);
        }
        (removed, empty)
    }

    fn ensure_sweeper(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() || self.sweeping.load(Ordering::Acquire) {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let started = self.sweepers_started.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(started, "starting cache sweeper");
        let cache = Arc::downgrade(self);
        let interval = self.config.sweep_interval.max(MIN_SWEEP_INTERVAL);
        let shutdown = self.shutdown.clone();
        handle.spawn(run_sweeper(cache, interval, shutdown));
    }
}

async fn run_sweeper<V: Send + Sync + 'static>(
    cache: Weak<ExpiringCache<V>>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    debug!(?interval, "cache sweeper started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("cache sweeper shut down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(strong) = cache.upgrade() else {
            return;
        };
        let (removed, empty) = strong.sweep_entries(true);
        debug!(removed, remaining = strong.len(), "cache sweep finished");
        if empty {
            debug!("cache empty, sweeper parked");
            return;
        }
    }
}
