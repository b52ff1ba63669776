use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::market::{Bar, Ticker, Timeframe};

/// One day's windowed bars, keyed by its trading-day offset from the
/// reference date.
///
/// Immutable once built: a refetch produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayOffsetResult {
    pub offset: i32,
    pub date: NaiveDate,
    pub bars: Vec<Bar>,
    pub complete: bool,
    pub error: Option<String>,
}

impl DayOffsetResult {
    pub fn complete(offset: i32, date: NaiveDate, bars: Vec<Bar>) -> Self {
        Self {
            offset,
            date,
            bars,
            complete: true,
            error: None,
        }
    }

    pub fn failed(offset: i32, date: NaiveDate, error: impl Into<String>) -> Self {
        Self {
            offset,
            date,
            bars: Vec::new(),
            complete: false,
            error: Some(error.into()),
        }
    }

    pub fn is_reference_day(&self) -> bool {
        self.offset == 0
    }

    pub fn last_bar(&self) -> Option<&Bar> {
        self.bars.last()
    }
}

/// Parameters for building a single day's window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRequest {
    pub ticker: Ticker,
    pub date: NaiveDate,
    pub timeframe: Timeframe,
    /// Trading-day distance from the reference date. Zero turns on
    /// session-boundary filtering.
    pub offset: i32,
}

impl DayRequest {
    pub fn new(ticker: Ticker, date: NaiveDate, timeframe: Timeframe, offset: i32) -> Self {
        Self {
            ticker,
            date,
            timeframe,
            offset,
        }
    }
}
