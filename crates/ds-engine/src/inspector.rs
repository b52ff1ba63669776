//! Chart inspection session.
//!
//! A [`ChartInspector`] ties one [`ChartDayState`] to the prefetch run that
//! fills its [`MultiDayCache`]. It is the single owner of the state; the
//! rendering layer reads [`ChartInspector::state`] and cache entries and
//! drives everything else through [`ChartInspector::navigate`].

use ds_data::{MultiDayCache, PrefetchHandle, PrefetchOrchestrator, PrefetchReport, PrefetchRequest};
use ds_types::{DayOffsetResult, DsResult, Ticker};
use std::sync::Arc;
use tracing::{debug, info};

use crate::navigation::{ChartDayState, NavAction, NavigationBounds};

#[derive(Debug)]
pub struct ChartInspector {
    orchestrator: PrefetchOrchestrator,
    min_backward_offset: i32,
    request: PrefetchRequest,
    state: ChartDayState,
    cache: Arc<MultiDayCache>,
    prefetch: Option<PrefetchHandle>,
}

impl ChartInspector {
    /// Start a session: spawn the prefetch and anchor navigation on the
    /// request's reference day. Must be called inside a tokio runtime.
    pub fn open(
        orchestrator: PrefetchOrchestrator,
        request: PrefetchRequest,
        min_backward_offset: i32,
    ) -> DsResult<Self> {
        let (state, handle) = Self::start(&orchestrator, &request, min_backward_offset)?;
        let cache = handle.cache();

        Ok(Self {
            orchestrator,
            min_backward_offset,
            request,
            state,
            cache,
            prefetch: Some(handle),
        })
    }

    fn start(
        orchestrator: &PrefetchOrchestrator,
        request: &PrefetchRequest,
        min_backward_offset: i32,
    ) -> DsResult<(ChartDayState, PrefetchHandle)> {
        let handle = orchestrator.spawn(request)?;
        let bounds = NavigationBounds {
            min_backward_offset,
            max_days: request.max_days,
        };
        let state = ChartDayState::new(request.reference_day, orchestrator.calendar(), bounds, orchestrator.now());

        info!(
            session = %handle.session_id(),
            ticker = %request.ticker,
            reference_day = %state.reference_day(),
            max_forward_offset = state.max_forward_offset(),
            "inspection session opened"
        );
        Ok((state, handle))
    }

    pub fn state(&self) -> &ChartDayState {
        &self.state
    }

    pub fn cache(&self) -> Arc<MultiDayCache> {
        Arc::clone(&self.cache)
    }

    pub fn ticker(&self) -> &Ticker {
        &self.request.ticker
    }

    /// The entry for the current offset, if it has been fetched.
    pub fn current(&self) -> Option<Arc<DayOffsetResult>> {
        self.cache.get(self.state.offset())
    }

    /// Apply a transition. After a move onto a day that is already cached
    /// the state settles immediately and the entry is returned. `SetLoading`
    /// and `SetDataArrived` are applied as given and return `None`.
    pub fn navigate(&mut self, action: NavAction) -> Option<Arc<DayOffsetResult>> {
        let calendar = self.orchestrator.calendar();
        let next = self.state.apply(action, calendar);
        if !action.is_movement() {
            self.state = next;
            return None;
        }
        if next == self.state {
            return self.current().filter(|_| self.state.has_data());
        }
        self.state = next;

        let cached = self.current()?;
        self.state = self.state.apply(NavAction::SetDataArrived, calendar);
        Some(cached)
    }

    /// Resolve the current offset: use the cached entry, wait for it if the
    /// running prefetch has it planned, or fetch the day directly.
    pub async fn load_current(&mut self) -> Option<Arc<DayOffsetResult>> {
        let offset = self.state.offset();
        let in_flight = self
            .prefetch
            .as_ref()
            .is_some_and(|handle| !handle.is_finished() && handle.planned_offsets().contains(&offset));

        let result = match self.cache.get(offset) {
            Some(cached) => Some(cached),
            None if in_flight => {
                debug!(offset, "waiting on prefetch for current day");
                self.cache.wait_for(offset).await
            }
            None => {
                debug!(offset, date = %self.state.current_day(), "fetching uncached day on demand");
                self.orchestrator
                    .fetch_day(&self.cache, offset, self.state.current_day())
                    .await
            }
        };

        // Navigation may have moved on while the fetch was in flight
        if result.is_some() && self.state.offset() == offset {
            self.state = self
                .state
                .apply(NavAction::SetDataArrived, self.orchestrator.calendar());
        }
        result
    }

    /// Refetch the current offset if its entry failed.
    pub async fn retry_current(&mut self) -> Option<Arc<DayOffsetResult>> {
        let offset = self.state.offset();
        match self.cache.get(offset) {
            Some(entry) if !entry.complete => self.orchestrator.retry_offset(&self.cache, offset).await,
            other => other,
        }
    }

    /// Wait for the running prefetch to finish. Returns `None` if it was
    /// already awaited.
    pub async fn wait_prefetch(&mut self) -> DsResult<Option<PrefetchReport>> {
        match self.prefetch.take() {
            Some(handle) => Ok(Some(handle.join().await?)),
            None => Ok(None),
        }
    }

    /// Switch to another ticker: cancel the current run, start a new session
    /// for the same reference day and reset navigation to offset 0.
    pub fn change_ticker(&mut self, ticker: &str) -> DsResult<()> {
        let ticker = Ticker::parse(ticker)?;
        let request = PrefetchRequest {
            ticker,
            ..self.request.clone()
        };

        let (state, handle) = Self::start(&self.orchestrator, &request, self.min_backward_offset)?;
        if let Some(previous) = self.prefetch.take() {
            previous.cancel();
        }
        self.cache.seal();

        self.cache = handle.cache();
        self.prefetch = Some(handle);
        self.state = state;
        self.request = request;
        Ok(())
    }

    /// End the session. Pending fetches are abandoned and the cache stops
    /// accepting writes; entries already stored stay readable.
    pub fn close(mut self) -> Arc<MultiDayCache> {
        if let Some(handle) = self.prefetch.take() {
            handle.cancel();
        }
        self.cache.seal();
        info!(session = %self.cache.session_id(), "inspection session closed");
        Arc::clone(&self.cache)
    }
}
