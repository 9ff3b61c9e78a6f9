//! TTL cache for lookup results.
//!
//! [`LookupCache`] maps the canonical string form of a join key vector to the
//! records the lookup source returned for it. Entries live for a fixed TTL
//! from insertion (reads do not extend it).
//!
//! Expiry is enforced twice:
//! - lazily on [`get`](LookupCache::get), so an expired entry is never returned
//! - by a background sweep task (period `2 × TTL`) that frees memory held by
//!   keys that are never read again
//!
//! The sweep task runs on its own [`CancellationToken`] and is torn down by
//! [`close`](LookupCache::close) or on drop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::lookup::source::LookupRecord;

/// Shared, immutable lookup result.
pub type LookupRows = Arc<[LookupRecord]>;

struct CacheEntry {
    rows: LookupRows,
    expires_at: Instant,
}

type EntryMap = FxHashMap<String, CacheEntry>;

/// TTL-bounded cache of lookup results, owned by one lookup join node.
pub struct LookupCache {
    entries: Arc<Mutex<EntryMap>>,
    ttl: Duration,
    cache_missing: bool,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LookupCache {
    /// Creates a cache whose entries expire `ttl` after insertion.
    ///
    /// `cache_missing` controls whether empty results are stored. When
    /// called inside a tokio runtime a background sweep task is started;
    /// outside one, expiry is purely lazy.
    #[must_use]
    pub fn new(ttl: Duration, cache_missing: bool) -> Self {
        let entries = Arc::new(Mutex::new(EntryMap::default()));
        let cancel = CancellationToken::new();
        let sweeper = tokio::runtime::Handle::try_current().ok().map(|rt| {
            rt.spawn(sweep_loop(
                Arc::clone(&entries),
                ttl.saturating_mul(2),
                cancel.clone(),
            ))
        });

        Self {
            entries,
            ttl,
            cache_missing,
            cancel,
            sweeper: Mutex::new(sweeper),
            closed: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached result for `key`, or `None` if it was never set,
    /// has expired, or the cache is closed.
    pub fn get(&self, key: &str) -> Option<LookupRows> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let found = match entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(Arc::clone(&entry.rows)),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };
        drop(entries);

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Inserts or overwrites `key`, expiring at now + TTL.
    ///
    /// Empty results are dropped unless the cache was built with
    /// `cache_missing`. Returns whether the entry was stored.
    pub fn set(&self, key: String, rows: LookupRows) -> bool {
        if self.closed.load(Ordering::Acquire) || (rows.is_empty() && !self.cache_missing) {
            return false;
        }
        let entry = CacheEntry {
            rows,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.lock().insert(key, entry);
        true
    }

    /// Removes every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries, Instant::now())
    }

    /// Releases all entries and stops the sweep task. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.entries.lock().clear();
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Entry time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total cache hits since creation.
    #[must_use]
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total cache misses since creation.
    #[must_use]
    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Drop for LookupCache {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for LookupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupCache")
            .field("ttl", &self.ttl)
            .field("cache_missing", &self.cache_missing)
            .field("entries", &self.entries.lock().len())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

fn purge(entries: &Mutex<EntryMap>, now: Instant) -> usize {
    let mut entries = entries.lock();
    let before = entries.len();
    entries.retain(|_, e| now < e.expires_at);
    before - entries.len()
}

async fn sweep_loop(entries: Arc<Mutex<EntryMap>>, period: Duration, cancel: CancellationToken) {
    if period.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            _ = ticker.tick() => {
                let removed = purge(&entries, Instant::now());
                if removed > 0 {
                    tracing::trace!(removed, "Lookup cache sweep");
                }
            }
        }
    }
}
