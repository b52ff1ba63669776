use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::DayWindowError;

/// Exchange ticker symbol, trimmed and upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    pub fn parse(raw: &str) -> Result<Self, DayWindowError> {
        let symbol = raw.trim();
        if symbol.is_empty() {
            return Err(DayWindowError::EmptyTicker);
        }
        Ok(Self(symbol.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Ticker {
    type Error = DayWindowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Ticker> for String {
    fn from(ticker: Ticker) -> Self {
        ticker.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// OHLCV bar with an absolute UTC timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Timestamp as milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Same prices, different timestamp.
    pub fn restamped(&self, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }

    /// True when prices and volume are non-negative and `low <= open, close <= high`.
    pub fn is_well_formed(&self) -> bool {
        let non_negative = [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| *v >= Decimal::ZERO);

        non_negative
            && self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
    }
}

/// Bar granularity requested from a bar source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Minute,
    FiveMinute,
    FifteenMinute,
    ThirtyMinute,
    Hour,
    Day,
}

impl Timeframe {
    pub fn to_seconds(&self) -> u64 {
        match self {
            Timeframe::Minute => 60,
            Timeframe::FiveMinute => 300,
            Timeframe::FifteenMinute => 900,
            Timeframe::ThirtyMinute => 1800,
            Timeframe::Hour => 3600,
            Timeframe::Day => 86400,
        }
    }

    pub fn is_intraday(&self) -> bool {
        !matches!(self, Timeframe::Day)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::Minute => "1m",
            Timeframe::FiveMinute => "5m",
            Timeframe::FifteenMinute => "15m",
            Timeframe::ThirtyMinute => "30m",
            Timeframe::Hour => "1h",
            Timeframe::Day => "1d",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" | "1min" => Ok(Timeframe::Minute),
            "5m" | "5min" => Ok(Timeframe::FiveMinute),
            "15m" | "15min" => Ok(Timeframe::FifteenMinute),
            "30m" | "30min" => Ok(Timeframe::ThirtyMinute),
            "1h" | "60m" => Ok(Timeframe::Hour),
            "1d" | "d" | "day" | "daily" => Ok(Timeframe::Day),
            other => Err(format!("unknown timeframe: {other}")),
        }
    }
}
