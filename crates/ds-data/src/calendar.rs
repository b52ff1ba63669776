//! Exchange trading calendar.
//!
//! Pure and deterministic: no IO, no wall clock. Answers whether a date is
//! tradable, what its session boundaries are, and how to step between
//! trading days. Session times are exchange-local wall-clock times converted
//! through the IANA timezone database, so DST transitions are exact.
//!
//! Years missing from the [`HolidayTable`] degrade to weekday-only rules.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use ds_types::{CalendarError, SessionType, TradingSession};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::holidays::HolidayTable;

/// Upper bound on calendar steps when searching for a trading day. A sane
/// table never gets near it; a pathological one falls back to weekday rules.
const MAX_SCAN_DAYS: u32 = 366;

/// Exchange-local session times
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// IANA timezone name of the exchange
    pub timezone: String,
    pub pre_market_start: NaiveTime,
    pub market_open: NaiveTime,
    pub market_close: NaiveTime,
    /// Regular-session close on early-close days
    pub early_close: NaiveTime,
    pub post_market_end: NaiveTime,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        let hm = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
        Self {
            timezone: "America/New_York".to_string(),
            pre_market_start: hm(4, 0),
            market_open: hm(9, 30),
            market_close: hm(16, 0),
            early_close: hm(13, 0),
            post_market_end: hm(20, 0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradingCalendar {
    table: Arc<HolidayTable>,
    config: CalendarConfig,
    tz: Tz,
}

impl TradingCalendar {
    pub fn new(table: Arc<HolidayTable>, config: CalendarConfig) -> Result<Self, CalendarError> {
        let tz: Tz = config
            .timezone
            .parse()
            .map_err(|_| CalendarError::InvalidTimezone {
                name: config.timezone.clone(),
            })?;

        let ordered = config.pre_market_start < config.market_open
            && config.market_open < config.early_close
            && config.early_close < config.market_close
            && config.market_close < config.post_market_end;
        if !ordered {
            return Err(CalendarError::InvalidTable {
                message: "session times must satisfy pre-market < open < early close < close < post-market"
                    .to_string(),
            });
        }

        Ok(Self { table, config, tz })
    }

    /// NYSE calendar with the built-in holiday table.
    pub fn nyse() -> Self {
        Self {
            table: Arc::new(HolidayTable::nyse()),
            config: CalendarConfig::default(),
            tz: chrono_tz::America::New_York,
        }
    }

    /// Parse a `YYYY-MM-DD` date string.
    pub fn parse_date(input: &str) -> Result<NaiveDate, CalendarError> {
        NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").map_err(|e| CalendarError::InvalidDate {
            input: input.to_string(),
            message: e.to_string(),
        })
    }

    pub fn table(&self) -> &HolidayTable {
        &self.table
    }

    pub fn config(&self) -> &CalendarConfig {
        &self.config
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn covers_year(&self, year: i32) -> bool {
        self.table.covers_year(year)
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !is_weekend(date) && !self.table.is_holiday(date)
    }

    pub fn is_early_close_day(&self, date: NaiveDate) -> bool {
        self.table.is_early_close(date)
    }

    /// Session boundaries for `date`.
    pub fn session(&self, date: NaiveDate) -> TradingSession {
        if !self.is_trading_day(date) {
            return TradingSession::closed(date, self.local_instant(date, NaiveTime::MIN));
        }

        let (close, session_type) = if self.is_early_close_day(date) {
            (self.config.early_close, SessionType::EarlyClose)
        } else {
            (self.config.market_close, SessionType::Full)
        };

        TradingSession {
            date,
            pre_market_start: self.local_instant(date, self.config.pre_market_start),
            market_open: self.local_instant(date, self.config.market_open),
            market_close: self.local_instant(date, close),
            post_market_end: self.local_instant(date, self.config.post_market_end),
            is_trading_day: true,
            session_type,
        }
    }

    /// First trading day strictly after `date`.
    pub fn next_trading_day(&self, date: NaiveDate) -> NaiveDate {
        self.scan(date, 1)
    }

    /// Last trading day strictly before `date`.
    pub fn previous_trading_day(&self, date: NaiveDate) -> NaiveDate {
        self.scan(date, -1)
    }

    /// `date` itself when tradable, otherwise the previous trading day.
    pub fn trading_day_on_or_before(&self, date: NaiveDate) -> NaiveDate {
        if self.is_trading_day(date) {
            date
        } else {
            self.previous_trading_day(date)
        }
    }

    /// Walk `steps` trading days from `date`; the sign picks the direction.
    pub fn offset_trading_day(&self, date: NaiveDate, steps: i32) -> NaiveDate {
        let mut current = date;
        for _ in 0..steps.unsigned_abs() {
            current = if steps > 0 {
                self.next_trading_day(current)
            } else {
                self.previous_trading_day(current)
            };
        }
        current
    }

    /// Trading sessions in `[start, end]`, ascending. Empty when `start > end`.
    pub fn trading_days_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<TradingSession> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_trading_day(*d))
            .map(|d| self.session(d))
            .collect()
    }

    /// Number of trading days in `[start, end]`.
    pub fn count_trading_days(&self, start: NaiveDate, end: NaiveDate) -> usize {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_trading_day(*d))
            .count()
    }

    /// Number of trading days in `(from, until]`; zero when `until <= from`.
    /// This is how far forward from `from` any data can exist as of `until`.
    pub fn trading_days_after(&self, from: NaiveDate, until: NaiveDate) -> usize {
        match from.succ_opt() {
            Some(start) => self.count_trading_days(start, until),
            None => 0,
        }
    }

    /// Exchange-local calendar date of an instant.
    pub fn exchange_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    fn scan(&self, date: NaiveDate, direction: i64) -> NaiveDate {
        let step = |d: NaiveDate| d.checked_add_signed(Duration::days(direction));

        let mut current = date;
        for _ in 0..MAX_SCAN_DAYS {
            match step(current) {
                Some(candidate) if self.is_trading_day(candidate) => return candidate,
                Some(candidate) => current = candidate,
                None => return date,
            }
        }

        tracing::warn!(%date, "holiday table blocks a full year; falling back to weekday rules");
        let mut current = date;
        loop {
            match step(current) {
                Some(candidate) if !is_weekend(candidate) => return candidate,
                Some(candidate) => current = candidate,
                None => return date,
            }
        }
    }

    fn local_instant(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = date.and_time(time);
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            // Wall-clock time skipped by a spring-forward transition
            .or_else(|| self.tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| naive.and_utc())
    }
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::nyse()
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}
