//! Per-day bar windowing.
//!
//! [`DayWindowBuilder`] turns one `(ticker, date, timeframe, offset)` request
//! into a [`DayOffsetResult`]: it picks a lookback, fetches from the injected
//! [`BarSource`] under a timeout, drops malformed bars, normalizes daily
//! timestamps to the session close, and for the reference day (offset 0)
//! strips every bar stamped after that day's close.
//!
//! Failures never escape [`DayWindowBuilder::build`]; they are captured in the
//! returned result so sibling days are unaffected.

use ds_types::{
    Bar, DayOffsetResult, DayRequest, DayWindowError, FetchError, Timeframe, TradingSession,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::calendar::TradingCalendar;
use crate::providers::BarSource;

/// Calendar-day lookbacks per intraday timeframe; finer bars look back less.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntradayLookback {
    pub minute: u32,
    pub five_minute: u32,
    pub fifteen_minute: u32,
    pub thirty_minute: u32,
    pub hour: u32,
}

impl Default for IntradayLookback {
    fn default() -> Self {
        Self {
            minute: 3,
            five_minute: 7,
            fifteen_minute: 14,
            thirty_minute: 21,
            hour: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Calendar days of daily history; 120 leaves roughly 80 trading days.
    pub daily_lookback_days: u32,
    pub intraday_lookback: IntradayLookback,
    /// Upper bound on a single bar-source call
    pub fetch_timeout_ms: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            daily_lookback_days: 120,
            intraday_lookback: IntradayLookback::default(),
            fetch_timeout_ms: 10_000,
        }
    }
}

impl WindowConfig {
    pub fn lookback_days(&self, timeframe: Timeframe) -> u32 {
        let intraday = &self.intraday_lookback;
        match timeframe {
            Timeframe::Day => self.daily_lookback_days,
            Timeframe::Minute => intraday.minute,
            Timeframe::FiveMinute => intraday.five_minute,
            Timeframe::FifteenMinute => intraday.fifteen_minute,
            Timeframe::ThirtyMinute => intraday.thirty_minute,
            Timeframe::Hour => intraday.hour,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Stateless per-day window builder; safe to share across tasks.
#[derive(Debug, Clone)]
pub struct DayWindowBuilder {
    source: Arc<dyn BarSource>,
    calendar: Arc<TradingCalendar>,
    config: WindowConfig,
}

impl DayWindowBuilder {
    pub fn new(source: Arc<dyn BarSource>, calendar: Arc<TradingCalendar>, config: WindowConfig) -> Self {
        Self {
            source,
            calendar,
            config,
        }
    }

    pub fn calendar(&self) -> &Arc<TradingCalendar> {
        &self.calendar
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Build one day's result. Never fails: errors become `complete: false`.
    pub async fn build(&self, request: &DayRequest) -> DayOffsetResult {
        match self.try_build(request).await {
            Ok(bars) => DayOffsetResult::complete(request.offset, request.date, bars),
            Err(e) => {
                warn!(
                    ticker = %request.ticker,
                    offset = request.offset,
                    date = %request.date,
                    error = %e,
                    "day window failed"
                );
                DayOffsetResult::failed(request.offset, request.date, e.to_string())
            }
        }
    }

    pub async fn try_build(&self, request: &DayRequest) -> Result<Vec<Bar>, DayWindowError> {
        if !self.calendar.is_trading_day(request.date) {
            return Err(DayWindowError::InvalidTargetDay { date: request.date });
        }

        let lookback = self.config.lookback_days(request.timeframe);
        let raw = self.fetch(request, lookback).await?;
        let fetched = raw.len();

        let session = self.calendar.session(request.date);
        let bars = self.window_bars(raw, request.timeframe, request.offset, &session);

        debug!(
            ticker = %request.ticker,
            offset = request.offset,
            date = %request.date,
            timeframe = %request.timeframe,
            lookback,
            fetched,
            kept = bars.len(),
            "built day window"
        );

        if bars.is_empty() {
            return Err(FetchError::Empty {
                ticker: request.ticker.to_string(),
                date: request.date,
            }
            .into());
        }
        Ok(bars)
    }

    async fn fetch(&self, request: &DayRequest, lookback: u32) -> Result<Vec<Bar>, FetchError> {
        let timeout = self.config.fetch_timeout();
        let call = self
            .source
            .fetch_bars(&request.ticker, request.timeframe, lookback, request.date);

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                timeout_ms: self.config.fetch_timeout_ms,
            }),
        }
    }

    /// Clean, normalize and (for offset 0) leak-filter raw bars.
    ///
    /// Output is sorted ascending with unique timestamps. Daily bars are
    /// assigned to their UTC calendar date and re-stamped at that date's
    /// session close; bars whose date is not a trading day are dropped.
    pub fn window_bars(
        &self,
        raw: Vec<Bar>,
        timeframe: Timeframe,
        offset: i32,
        session: &TradingSession,
    ) -> Vec<Bar> {
        let total = raw.len();
        let mut bars: Vec<Bar> = raw.into_iter().filter(Bar::is_well_formed).collect();
        let malformed = total - bars.len();

        if !timeframe.is_intraday() {
            bars = bars
                .into_iter()
                .filter_map(|bar| {
                    let date = bar.timestamp.date_naive();
                    self.calendar
                        .is_trading_day(date)
                        .then(|| bar.restamped(self.calendar.session(date).market_close))
                })
                .collect();
        }

        // Stable sort keeps source order among equal stamps; the later one wins.
        bars.sort_by_key(|b| b.timestamp);
        let mut unique: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match unique.last_mut() {
                Some(last) if last.timestamp == bar.timestamp => *last = bar,
                _ => unique.push(bar),
            }
        }

        let mut leaked = 0;
        if offset == 0 {
            let before = unique.len();
            unique.retain(|b| b.timestamp <= session.market_close);
            leaked = before - unique.len();
        }

        if malformed > 0 || leaked > 0 {
            debug!(
                date = %session.date,
                malformed,
                leaked,
                "dropped bars while windowing"
            );
        }
        unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use ds_types::Ticker;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[derive(Debug)]
    enum Reply {
        Bars(Vec<Bar>),
        Fail,
        Hang,
    }

    #[derive(Debug)]
    struct StubSource {
        reply: Reply,
    }

    #[async_trait]
    impl BarSource for StubSource {
        async fn fetch_bars(
            &self,
            _ticker: &Ticker,
            _timeframe: Timeframe,
            _lookback_days: u32,
            _end_date: NaiveDate,
        ) -> Result<Vec<Bar>, FetchError> {
            match &self.reply {
                Reply::Bars(bars) => Ok(bars.clone()),
                Reply::Fail => Err(FetchError::Source {
                    message: "upstream 503".to_string(),
                }),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn utc(y: i32, m: u32, day: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, day, h, min, 0).unwrap()
    }

    fn bar_at(ts: DateTime<Utc>, close: Decimal) -> Bar {
        Bar::new(ts, close, close + dec!(1), close - dec!(1), close, dec!(1000))
    }

    fn builder(reply: Reply) -> DayWindowBuilder {
        DayWindowBuilder::new(
            Arc::new(StubSource { reply }),
            Arc::new(TradingCalendar::nyse()),
            WindowConfig {
                fetch_timeout_ms: 5_000,
                ..Default::default()
            },
        )
    }

    fn request(date: NaiveDate, timeframe: Timeframe, offset: i32) -> DayRequest {
        DayRequest::new(Ticker::parse("AAPL").unwrap(), date, timeframe, offset)
    }

    #[test]
    fn test_lookback_shrinks_with_granularity() {
        let config = WindowConfig::default();
        let days: Vec<u32> = [
            Timeframe::Day,
            Timeframe::Hour,
            Timeframe::ThirtyMinute,
            Timeframe::FifteenMinute,
            Timeframe::FiveMinute,
            Timeframe::Minute,
        ]
        .iter()
        .map(|tf| config.lookback_days(*tf))
        .collect();
        assert!(days.windows(2).all(|w| w[0] > w[1]), "{days:?}");

        // ~120 calendar days leaves between 45 and 90 sessions
        let cal = TradingCalendar::nyse();
        let sessions = cal.count_trading_days(d(2025, 8, 1), d(2025, 11, 28));
        assert!((45..=90).contains(&sessions), "{sessions}");
    }

    #[tokio::test]
    async fn test_reference_day_daily_drops_next_session() {
        let raw = vec![
            bar_at(utc(2025, 11, 26, 0, 0), dec!(100)),
            bar_at(utc(2025, 11, 28, 0, 0), dec!(101)),
            bar_at(utc(2025, 12, 1, 0, 0), dec!(102)), // not yet known on the 28th
        ];
        let b = builder(Reply::Bars(raw));

        let result = b.build(&request(d(2025, 11, 28), Timeframe::Day, 0)).await;
        assert!(result.complete);
        assert_eq!(result.bars.len(), 2);

        let close = TradingCalendar::nyse().session(d(2025, 11, 28)).market_close;
        assert!(result.bars.iter().all(|bar| bar.timestamp <= close));
        // Daily bars re-stamped at the (early) close of their own date
        assert_eq!(result.bars[1].timestamp, utc(2025, 11, 28, 18, 0));
        assert_eq!(result.bars[0].timestamp, utc(2025, 11, 26, 21, 0));
    }

    #[tokio::test]
    async fn test_forward_offsets_are_not_filtered() {
        let raw = vec![
            bar_at(utc(2025, 11, 28, 0, 0), dec!(101)),
            bar_at(utc(2025, 12, 1, 0, 0), dec!(102)),
        ];
        let b = builder(Reply::Bars(raw));

        let result = b.build(&request(d(2025, 11, 28), Timeframe::Day, 2)).await;
        assert!(result.complete);
        assert_eq!(result.bars.len(), 2);
    }

    #[tokio::test]
    async fn test_intraday_early_close_filtering() {
        let raw = vec![
            bar_at(utc(2025, 11, 28, 17, 45), dec!(100)),
            bar_at(utc(2025, 11, 28, 18, 0), dec!(100)),
            bar_at(utc(2025, 11, 28, 18, 30), dec!(100)), // after 13:00 ET early close
            bar_at(utc(2025, 11, 28, 20, 45), dec!(100)), // before the normal 16:00 ET close
            bar_at(utc(2025, 12, 1, 14, 30), dec!(100)),
        ];
        let b = builder(Reply::Bars(raw));

        let result = b.build(&request(d(2025, 11, 28), Timeframe::FifteenMinute, 0)).await;
        assert!(result.complete);
        let stamps: Vec<_> = result.bars.iter().map(|b| b.timestamp).collect();
        assert_eq!(stamps, vec![utc(2025, 11, 28, 17, 45), utc(2025, 11, 28, 18, 0)]);
    }

    #[tokio::test]
    async fn test_non_trading_target_fails_locally() {
        let b = builder(Reply::Bars(vec![bar_at(utc(2025, 11, 26, 0, 0), dec!(1))]));
        let result = b.build(&request(d(2025, 11, 27), Timeframe::Day, 0)).await;
        assert!(!result.complete);
        assert!(result.error.unwrap().contains("not a trading day"));

        let err = b.try_build(&request(d(2025, 11, 29), Timeframe::Day, 0)).await.unwrap_err();
        assert_eq!(err, DayWindowError::InvalidTargetDay { date: d(2025, 11, 29) });
    }

    #[tokio::test]
    async fn test_empty_and_failed_sources() {
        let empty = builder(Reply::Bars(Vec::new()));
        let result = empty.build(&request(d(2025, 12, 1), Timeframe::Day, 1)).await;
        assert!(!result.complete);
        assert!(result.error.unwrap().contains("No bars"));

        let failing = builder(Reply::Fail);
        let result = failing.build(&request(d(2025, 12, 1), Timeframe::Day, 1)).await;
        assert!(!result.complete);
        assert!(result.bars.is_empty());
        assert!(result.error.unwrap().contains("503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_local_failure() {
        let b = builder(Reply::Hang);
        let err = b.try_build(&request(d(2025, 12, 1), Timeframe::Day, 0)).await.unwrap_err();
        assert_eq!(err, DayWindowError::Fetch(FetchError::Timeout { timeout_ms: 5_000 }));
    }

    #[tokio::test]
    async fn test_malformed_duplicate_and_holiday_bars_removed() {
        let mut broken = bar_at(utc(2025, 11, 24, 0, 0), dec!(100));
        broken.high = dec!(50);
        let raw = vec![
            broken,
            bar_at(utc(2025, 11, 25, 0, 0), dec!(100)),
            bar_at(utc(2025, 11, 25, 21, 0), dec!(105)), // same session, restamps to the same close
            bar_at(utc(2025, 11, 27, 0, 0), dec!(100)),  // Thanksgiving
            bar_at(utc(2025, 11, 26, 0, 0), dec!(100)),
        ];
        let b = builder(Reply::Bars(raw));

        let result = b.build(&request(d(2025, 11, 26), Timeframe::Day, 0)).await;
        let stamps: Vec<_> = result.bars.iter().map(|b| b.timestamp).collect();
        assert_eq!(stamps, vec![utc(2025, 11, 25, 21, 0), utc(2025, 11, 26, 21, 0)]);
        assert_eq!(result.bars[0].close, dec!(105));
    }
}
