use chrono::NaiveDate;
use dashmap::DashMap;
use ds_types::{DayOffsetResult, Ticker, Timeframe};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Offset-indexed day results for one inspection session.
///
/// Entries are whole `Arc<DayOffsetResult>` values, inserted only once the
/// day's fetch has finished, so readers never observe a partial day. The
/// map only grows; a retried offset replaces its entry with a new result.
/// Writes carry the session id of the run that produced them and are
/// rejected if it does not match or the cache has been sealed.
#[derive(Debug)]
pub struct MultiDayCache {
    session_id: Uuid,
    ticker: Ticker,
    reference_day: NaiveDate,
    timeframe: Timeframe,
    entries: DashMap<i32, Arc<DayOffsetResult>>,
    sealed: AtomicBool,
    stats: RwLock<CacheStats>,
    changed: Notify,
}

impl MultiDayCache {
    pub fn new(session_id: Uuid, ticker: Ticker, reference_day: NaiveDate, timeframe: Timeframe) -> Self {
        Self {
            session_id,
            ticker,
            reference_day,
            timeframe,
            entries: DashMap::new(),
            sealed: AtomicBool::new(false),
            stats: RwLock::new(CacheStats::default()),
            changed: Notify::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    pub fn reference_day(&self) -> NaiveDate {
        self.reference_day
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Store a finished day. Returns false if the write was rejected.
    pub fn insert(&self, session_id: Uuid, result: DayOffsetResult) -> bool {
        if session_id != self.session_id || self.is_sealed() {
            tracing::warn!(
                cache_session = %self.session_id,
                writer_session = %session_id,
                offset = result.offset,
                sealed = self.is_sealed(),
                "rejected stale cache write"
            );
            self.stats.write().rejected_writes += 1;
            return false;
        }

        let complete = result.complete;
        self.entries.insert(result.offset, Arc::new(result));

        {
            let mut stats = self.stats.write();
            stats.stores += 1;
            if !complete {
                stats.failed_stores += 1;
            }
        }
        self.changed.notify_waiters();
        true
    }

    /// Wait until `offset` is stored. Returns `None` once the cache is
    /// sealed without it.
    pub async fn wait_for(&self, offset: i32) -> Option<Arc<DayOffsetResult>> {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if self.contains(offset) {
                return self.get(offset);
            }
            if self.is_sealed() {
                return None;
            }
            changed.await;
        }
    }

    pub fn get(&self, offset: i32) -> Option<Arc<DayOffsetResult>> {
        let found = self.entries.get(&offset).map(|e| Arc::clone(e.value()));

        let mut stats = self.stats.write();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    pub fn contains(&self, offset: i32) -> bool {
        self.entries.contains_key(&offset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached offsets, ascending.
    pub fn offsets(&self) -> Vec<i32> {
        let mut offsets: Vec<i32> = self.entries.iter().map(|e| *e.key()).collect();
        offsets.sort_unstable();
        offsets
    }

    /// Ordered copy of every entry for the rendering layer.
    pub fn snapshot(&self) -> BTreeMap<i32, Arc<DayOffsetResult>> {
        self.entries
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect()
    }

    pub fn complete_count(&self) -> usize {
        self.entries.iter().filter(|e| e.value().complete).count()
    }

    /// Offsets whose entry is marked incomplete, ascending.
    pub fn failed_offsets(&self) -> Vec<i32> {
        let mut failed: Vec<i32> = self
            .entries
            .iter()
            .filter(|e| !e.value().complete)
            .map(|e| *e.key())
            .collect();
        failed.sort_unstable();
        failed
    }

    /// Reject all later writes. Used when the owning session is canceled
    /// or replaced.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
        self.changed.notify_waiters();
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn get_stats(&self) -> CacheStats {
        self.stats.read().clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub failed_stores: u64,
    pub rejected_writes: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}
