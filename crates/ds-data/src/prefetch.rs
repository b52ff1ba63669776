//! Multi-day prefetch.
//!
//! [`PrefetchOrchestrator`] plans the trading days around a reference day,
//! hands one job per offset to a fixed pool of worker tasks over a channel,
//! and writes each finished [`DayOffsetResult`] into a [`MultiDayCache`].
//! Workers only send results back; the orchestrator is the cache's single
//! writer. A failed day is cached as `complete: false` and never stops its
//! siblings.
//!
//! The current instant is injected at construction, so "how far forward can
//! data exist" is deterministic.

use chrono::{DateTime, NaiveDate, Utc};
use ds_types::{
    config_error, internal_error, validation_error, DayOffsetResult, DayRequest, DayWindowError,
    DsResult, Ticker, Timeframe,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::MultiDayCache;
use crate::calendar::TradingCalendar;
use crate::window::DayWindowBuilder;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Number of concurrent day fetches
    pub concurrency: usize,
    /// Attempts per day for transient failures (source errors, timeouts)
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry
    pub retry_backoff_ms: u64,
    /// Trading days before the reference day to prefetch as context
    pub backward_days: u32,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 1,
            retry_backoff_ms: 250,
            backward_days: 0,
        }
    }
}

/// What to prefetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchRequest {
    pub ticker: Ticker,
    pub reference_day: NaiveDate,
    pub timeframe: Timeframe,
    /// Forward trading days after the reference day
    pub max_days: u32,
}

impl PrefetchRequest {
    /// Validates inputs; a negative `max_days` or blank ticker is rejected.
    pub fn new(ticker: &str, reference_day: NaiveDate, timeframe: Timeframe, max_days: i64) -> DsResult<Self> {
        let ticker = Ticker::parse(ticker)?;
        let max_days = u32::try_from(max_days)
            .map_err(|_| validation_error!("max_days must be between 0 and {}, got {}", u32::MAX, max_days))?;

        Ok(Self {
            ticker,
            reference_day,
            timeframe,
            max_days,
        })
    }
}

/// Outcome of one prefetch run
#[derive(Debug, Clone)]
pub struct PrefetchReport {
    pub session_id: Uuid,
    pub cache: Arc<MultiDayCache>,
    pub requested: usize,
    pub completed: usize,
    pub failed: usize,
    pub failed_offsets: Vec<i32>,
    pub canceled: bool,
}

impl PrefetchReport {
    /// True when nothing usable came back (every day failed or none ran).
    pub fn nothing_available(&self) -> bool {
        self.completed == 0
    }
}

/// A prefetch running in the background.
///
/// Dropping the handle does not stop the run; call [`PrefetchHandle::cancel`].
#[derive(Debug)]
pub struct PrefetchHandle {
    cache: Arc<MultiDayCache>,
    planned: Vec<i32>,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<PrefetchReport>,
}

impl PrefetchHandle {
    /// Readable while the run is in progress; entries appear as days finish.
    pub fn cache(&self) -> Arc<MultiDayCache> {
        Arc::clone(&self.cache)
    }

    pub fn session_id(&self) -> Uuid {
        self.cache.session_id()
    }

    /// Offsets this run will write, ascending.
    pub fn planned_offsets(&self) -> &[i32] {
        &self.planned
    }

    /// Stop issuing fetches and seal the cache against further writes.
    /// Entries already written stay readable.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
        self.cache.seal();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> DsResult<PrefetchReport> {
        self.task
            .await
            .map_err(|e| internal_error!("prefetch task failed: {}", e))
    }
}

#[derive(Debug, Clone)]
pub struct PrefetchOrchestrator {
    builder: Arc<DayWindowBuilder>,
    config: PrefetchConfig,
    now: DateTime<Utc>,
}

impl PrefetchOrchestrator {
    pub fn new(builder: DayWindowBuilder, config: PrefetchConfig, now: DateTime<Utc>) -> DsResult<Self> {
        if config.concurrency == 0 {
            return Err(config_error!("prefetch concurrency must be at least 1"));
        }
        if config.max_attempts == 0 {
            return Err(config_error!("prefetch max_attempts must be at least 1"));
        }

        Ok(Self {
            builder: Arc::new(builder),
            config,
            now,
        })
    }

    pub fn calendar(&self) -> &TradingCalendar {
        self.builder.calendar()
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Exchange-local date of the injected current instant.
    pub fn today(&self) -> NaiveDate {
        self.calendar().exchange_date(self.now)
    }

    /// Furthest forward offset with data as of today, capped at `max_days`.
    pub fn max_forward_offset(&self, reference_day: NaiveDate, max_days: u32) -> u32 {
        let available = self.calendar().trading_days_after(reference_day, self.today());
        max_days.min(u32::try_from(available).unwrap_or(u32::MAX))
    }

    /// One [`DayRequest`] per offset, from `-backward_days` through the
    /// forward bound, in ascending offset order.
    pub fn plan(&self, request: &PrefetchRequest) -> DsResult<Vec<DayRequest>> {
        let calendar = self.calendar();
        let today = self.today();
        if request.reference_day > today {
            return Err(validation_error!(
                "reference day {} is after today ({})",
                request.reference_day,
                today
            ));
        }

        let reference = calendar.trading_day_on_or_before(request.reference_day);
        if reference != request.reference_day {
            warn!(
                requested = %request.reference_day,
                resolved = %reference,
                "reference day is not a trading day; using the previous session"
            );
        }

        let forward = self.max_forward_offset(reference, request.max_days);
        let day_request = |offset: i32, date: NaiveDate| {
            DayRequest::new(request.ticker.clone(), date, request.timeframe, offset)
        };

        let mut backward = Vec::new();
        let mut date = reference;
        for step in 1..=self.config.backward_days {
            date = calendar.previous_trading_day(date);
            backward.push(day_request(-(step as i32), date));
        }
        backward.reverse();

        let mut jobs = backward;
        jobs.push(day_request(0, reference));
        let mut date = reference;
        for offset in 1..=forward {
            date = calendar.next_trading_day(date);
            jobs.push(day_request(offset as i32, date));
        }
        Ok(jobs)
    }

    /// Run a prefetch to completion in a fresh session.
    pub async fn prefetch(&self, request: &PrefetchRequest) -> DsResult<PrefetchReport> {
        let jobs = self.plan(request)?;
        let cache = Arc::new(self.new_cache(request));
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        Ok(self.run(cache, jobs, cancel_rx).await)
    }

    /// Start a prefetch on the runtime and return a cancelable handle.
    pub fn spawn(&self, request: &PrefetchRequest) -> DsResult<PrefetchHandle> {
        let jobs = self.plan(request)?;
        let planned = jobs.iter().map(|job| job.offset).collect();
        let cache = Arc::new(self.new_cache(request));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let orchestrator = self.clone();
        let run_cache = Arc::clone(&cache);
        let task = tokio::spawn(async move { orchestrator.run(run_cache, jobs, cancel_rx).await });

        Ok(PrefetchHandle {
            cache,
            planned,
            cancel_tx,
            task,
        })
    }

    /// Refetch one cached offset and replace its entry. Returns `None` if
    /// the offset was never planned or the cache rejected the write.
    pub async fn retry_offset(&self, cache: &MultiDayCache, offset: i32) -> Option<Arc<DayOffsetResult>> {
        let previous = cache.get(offset)?;
        self.fetch_day(cache, offset, previous.date).await
    }

    /// Fetch a single offset on demand and store it in `cache`, e.g. when
    /// navigation reaches a day the prefetch did not cover. Returns `None`
    /// if the cache rejected the write.
    pub async fn fetch_day(&self, cache: &MultiDayCache, offset: i32, date: NaiveDate) -> Option<Arc<DayOffsetResult>> {
        if cache.is_sealed() {
            debug!(session = %cache.session_id(), offset, "cache sealed; skipping fetch");
            return None;
        }
        let request = DayRequest::new(cache.ticker().clone(), date, cache.timeframe(), offset);

        let result = fetch_with_retry(&self.builder, &request, &self.config).await;
        if cache.insert(cache.session_id(), result) {
            cache.get(offset)
        } else {
            None
        }
    }

    fn new_cache(&self, request: &PrefetchRequest) -> MultiDayCache {
        let reference = self.calendar().trading_day_on_or_before(request.reference_day);
        MultiDayCache::new(Uuid::new_v4(), request.ticker.clone(), reference, request.timeframe)
    }

    async fn run(
        &self,
        cache: Arc<MultiDayCache>,
        jobs: Vec<DayRequest>,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> PrefetchReport {
        let session_id = cache.session_id();
        let requested = jobs.len();
        let workers = self.config.concurrency.min(requested).max(1);

        info!(
            session = %session_id,
            ticker = %cache.ticker(),
            reference_day = %cache.reference_day(),
            timeframe = %cache.timeframe(),
            days = requested,
            workers,
            "prefetch started"
        );

        let (job_tx, job_rx) = mpsc::channel::<DayRequest>(requested.max(1));
        for job in jobs {
            // Capacity equals the job count, so this cannot fill up
            let _ = job_tx.try_send(job);
        }
        drop(job_tx);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let (result_tx, mut result_rx) = mpsc::channel::<DayOffsetResult>(workers);
        for worker in 0..workers {
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            let builder = Arc::clone(&self.builder);
            let config = self.config.clone();
            let mut cancel = cancel_rx.clone();

            tokio::spawn(async move {
                loop {
                    if *cancel.borrow() {
                        break;
                    }
                    let next = jobs.lock().await.recv().await;
                    let Some(request) = next else { break };

                    let result = tokio::select! {
                        biased;
                        _ = wait_for_cancel(&mut cancel) => {
                            debug!(worker, offset = request.offset, "abandoned in-flight fetch");
                            break;
                        }
                        result = fetch_with_retry(&builder, &request, &config) => result,
                    };

                    if results.send(result).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut canceled = false;
        loop {
            tokio::select! {
                biased;
                _ = wait_for_cancel(&mut cancel_rx) => {
                    canceled = true;
                    break;
                }
                next = result_rx.recv() => match next {
                    Some(result) => {
                        cache.insert(session_id, result);
                    }
                    None => break,
                },
            }
        }

        if canceled {
            cache.seal();
        }

        let failed_offsets = cache.failed_offsets();
        let report = PrefetchReport {
            session_id,
            requested,
            completed: cache.complete_count(),
            failed: failed_offsets.len(),
            failed_offsets,
            canceled,
            cache,
        };

        if report.canceled {
            warn!(
                session = %session_id,
                completed = report.completed,
                requested,
                "prefetch canceled"
            );
        } else {
            info!(
                session = %session_id,
                completed = report.completed,
                failed = report.failed,
                "prefetch finished"
            );
        }
        report
    }
}

/// Build one day, retrying transient fetch failures with doubling backoff.
async fn fetch_with_retry(
    builder: &DayWindowBuilder,
    request: &DayRequest,
    config: &PrefetchConfig,
) -> DayOffsetResult {
    let mut attempt = 1;
    loop {
        match builder.try_build(request).await {
            Ok(bars) => return DayOffsetResult::complete(request.offset, request.date, bars),
            Err(DayWindowError::Fetch(e)) if e.is_retryable() && attempt < config.max_attempts => {
                let backoff = Duration::from_millis(config.retry_backoff_ms << (attempt - 1).min(16));
                debug!(
                    offset = request.offset,
                    date = %request.date,
                    attempt,
                    error = %e,
                    "retrying day fetch"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    ticker = %request.ticker,
                    offset = request.offset,
                    date = %request.date,
                    attempt,
                    error = %e,
                    "day fetch failed"
                );
                return DayOffsetResult::failed(request.offset, request.date, e.to_string());
            }
        }
    }
}

/// Resolves once cancellation is requested. Never resolves if the sender
/// is gone without having canceled.
async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
