use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use ds_data::{
    BarSource, DayWindowBuilder, PrefetchConfig, PrefetchOrchestrator, PrefetchRequest, TradingCalendar,
    WindowConfig,
};
use ds_engine::{ChartDayState, ChartInspector, NavAction, NavigationBounds};
use ds_types::{Bar, FetchError, Ticker, Timeframe};
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 17, 23, 0, 0).unwrap()
}

fn bar(timestamp: DateTime<Utc>) -> Bar {
    Bar::new(timestamp, dec!(100), dec!(101), dec!(99), dec!(100.5), dec!(1000))
}

/// Always returns one session more than asked for, so anything that reaches
/// past the requested day's close is visible in the result.
#[derive(Debug)]
struct LeakySource {
    calendar: TradingCalendar,
    failing: HashSet<NaiveDate>,
}

impl LeakySource {
    fn new() -> Self {
        Self {
            calendar: TradingCalendar::nyse(),
            failing: HashSet::new(),
        }
    }

    fn failing_on(mut self, date: NaiveDate) -> Self {
        self.failing.insert(date);
        self
    }
}

#[async_trait]
impl BarSource for LeakySource {
    async fn fetch_bars(
        &self,
        _ticker: &Ticker,
        timeframe: Timeframe,
        lookback_days: u32,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError> {
        if self.failing.contains(&end_date) {
            return Err(FetchError::Source {
                message: "upstream 503".to_string(),
            });
        }

        let last = self.calendar.next_trading_day(end_date);
        let mut bars = Vec::new();
        if timeframe.is_intraday() {
            let step = Duration::seconds(timeframe.to_seconds() as i64);
            for date in [end_date, last] {
                let open = self.calendar.session(date).market_open;
                let mut ts = open;
                while ts < open + Duration::hours(10) {
                    bars.push(bar(ts));
                    ts += step;
                }
            }
        } else {
            let mut date = end_date - Duration::days(i64::from(lookback_days));
            while date <= last {
                let midnight = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap());
                bars.push(bar(midnight));
                date += Duration::days(1);
            }
        }
        Ok(bars)
    }

    fn name(&self) -> &str {
        "leaky"
    }
}

fn orchestrator(source: LeakySource) -> PrefetchOrchestrator {
    let calendar = Arc::new(TradingCalendar::nyse());
    let builder = DayWindowBuilder::new(Arc::new(source), calendar, WindowConfig::default());
    PrefetchOrchestrator::new(builder, PrefetchConfig::default(), now()).unwrap()
}

#[tokio::test]
async fn thanksgiving_week_prefetch() {
    let orch = orchestrator(LeakySource::new());
    let request = PrefetchRequest::new("AAPL", d(2025, 11, 28), Timeframe::Day, 3).unwrap();

    let report = orch.prefetch(&request).await.unwrap();
    let days: Vec<(i32, NaiveDate, bool)> = report
        .cache
        .snapshot()
        .values()
        .map(|r| (r.offset, r.date, r.complete))
        .collect();

    assert_eq!(
        days,
        vec![
            (0, d(2025, 11, 28), true),
            (1, d(2025, 12, 1), true),
            (2, d(2025, 12, 2), true),
            (3, d(2025, 12, 3), true),
        ]
    );
}

#[tokio::test]
async fn reference_day_has_no_look_ahead() {
    let orch = orchestrator(LeakySource::new());
    let calendar = TradingCalendar::nyse();

    for timeframe in [Timeframe::Day, Timeframe::ThirtyMinute] {
        let request = PrefetchRequest::new("AAPL", d(2025, 12, 10), timeframe, 2).unwrap();
        let report = orch.prefetch(&request).await.unwrap();

        let reference = report.cache.get(0).unwrap();
        assert!(reference.complete);
        let close = calendar.session(d(2025, 12, 10)).market_close;
        assert!(reference.bars.iter().all(|b| b.timestamp <= close), "{timeframe} leaked");
        assert!(reference.bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}

#[tokio::test]
async fn early_close_trims_reference_day() {
    let orch = orchestrator(LeakySource::new());
    let calendar = TradingCalendar::nyse();
    let session = calendar.session(d(2025, 11, 28));
    let full_close = calendar.session(d(2025, 12, 1)).market_close;
    assert!(session.market_close.time() < full_close.time());

    let request = PrefetchRequest::new("AAPL", d(2025, 11, 28), Timeframe::ThirtyMinute, 1).unwrap();
    let report = orch.prefetch(&request).await.unwrap();

    let reference = report.cache.get(0).unwrap();
    // 09:30 through the 13:00 close, inclusive, in 30 minute steps
    assert_eq!(reference.bars.len(), 8);
    assert_eq!(reference.last_bar().unwrap().timestamp, session.market_close);

    // Forward days are not reference days and keep their full range
    let next = report.cache.get(1).unwrap();
    assert!(next.bars.iter().any(|b| b.timestamp > full_close));
}

#[tokio::test]
async fn one_bad_day_in_ten_is_isolated() {
    let orch = orchestrator(LeakySource::new().failing_on(d(2025, 12, 4)));
    let request = PrefetchRequest::new("AAPL", d(2025, 11, 28), Timeframe::Day, 9).unwrap();

    let report = orch.prefetch(&request).await.unwrap();
    let entries = report.cache.snapshot();
    assert_eq!(entries.len(), 10);
    assert_eq!(entries.values().filter(|r| r.complete).count(), 9);

    let failed: Vec<_> = entries.values().filter(|r| !r.complete).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].date, d(2025, 12, 4));
    assert!(failed[0].error.as_deref().unwrap().contains("503"));
}

#[test]
fn navigation_round_trip_and_clamping() {
    let calendar = TradingCalendar::nyse();
    let bounds = NavigationBounds {
        min_backward_offset: -5,
        max_days: 10,
    };
    let state = ChartDayState::new(d(2025, 11, 28), &calendar, bounds, now());

    for n in state.min_backward_offset()..=state.max_forward_offset() {
        let back = state
            .apply(NavAction::GoToOffset(n), &calendar)
            .apply(NavAction::GoToOffset(0), &calendar);
        assert_eq!(back.current_day(), state.reference_day());
    }

    let mut at_edge = state.apply(NavAction::GoToOffset(state.max_forward_offset()), &calendar);
    for _ in 0..5 {
        at_edge = at_edge.apply(NavAction::NextDay, &calendar);
    }
    assert_eq!(at_edge.offset(), 10);
    assert_eq!(at_edge.current_day(), d(2025, 12, 12));
}

#[tokio::test]
async fn inspector_walks_prefetched_days() {
    let orch = orchestrator(LeakySource::new().failing_on(d(2025, 12, 2)));
    let request = PrefetchRequest::new("aapl", d(2025, 11, 28), Timeframe::Day, 3).unwrap();
    let mut inspector = ChartInspector::open(orch, request, -1).unwrap();
    inspector.wait_prefetch().await.unwrap();

    let mut seen = Vec::new();
    while inspector.state().can_go_forward() {
        let day = inspector.navigate(NavAction::NextDay).unwrap();
        seen.push((day.date, day.complete));
        assert!(inspector.state().has_data());
    }
    assert_eq!(
        seen,
        vec![(d(2025, 12, 1), true), (d(2025, 12, 2), false), (d(2025, 12, 3), true)]
    );

    // Offset -1 is in bounds but was not prefetched
    assert!(inspector.navigate(NavAction::GoToOffset(-1)).is_none());
    let day = inspector.load_current().await.unwrap();
    assert_eq!(day.date, d(2025, 11, 26));

    let cache = inspector.close();
    assert_eq!(cache.offsets(), vec![-1, 0, 1, 2, 3]);
}
