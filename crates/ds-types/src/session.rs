use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of trading session on a calendar date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    Full,
    EarlyClose,
    Closed,
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionType::Full => "Full",
            SessionType::EarlyClose => "EarlyClose",
            SessionType::Closed => "Closed",
        };
        write!(f, "{}", s)
    }
}

/// Market timing for one calendar date.
///
/// Instants are the exchange-local session boundaries expressed in UTC.
/// For [`SessionType::Closed`] dates the four instants are placeholders
/// (all equal to local midnight) and must not be read; check
/// [`TradingSession::is_trading_day`] first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingSession {
    pub date: NaiveDate,
    pub pre_market_start: DateTime<Utc>,
    pub market_open: DateTime<Utc>,
    pub market_close: DateTime<Utc>,
    pub post_market_end: DateTime<Utc>,
    pub is_trading_day: bool,
    pub session_type: SessionType,
}

impl TradingSession {
    pub fn closed(date: NaiveDate, placeholder: DateTime<Utc>) -> Self {
        Self {
            date,
            pre_market_start: placeholder,
            market_open: placeholder,
            market_close: placeholder,
            post_market_end: placeholder,
            is_trading_day: false,
            session_type: SessionType::Closed,
        }
    }

    /// True if `instant` falls inside the regular session `[open, close]`.
    pub fn in_regular_hours(&self, instant: DateTime<Utc>) -> bool {
        self.is_trading_day && instant >= self.market_open && instant <= self.market_close
    }

    /// True if `instant` falls anywhere between pre-market start and post-market end.
    pub fn in_extended_hours(&self, instant: DateTime<Utc>) -> bool {
        self.is_trading_day && instant >= self.pre_market_start && instant <= self.post_market_end
    }

    /// Length of the regular session in minutes; zero for closed dates.
    pub fn regular_minutes(&self) -> i64 {
        if !self.is_trading_day {
            return 0;
        }
        (self.market_close - self.market_open).num_minutes()
    }
}
