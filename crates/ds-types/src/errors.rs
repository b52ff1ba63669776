use chrono::NaiveDate;
use thiserror::Error;

/// Main error type for the DaySlide system
#[derive(Error, Debug)]
pub enum DsError {
    #[error("Calendar error: {0}")]
    Calendar(#[from] CalendarError),

    #[error("Day window error: {0}")]
    Window(#[from] DayWindowError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Calendar errors. Only malformed input produces these; dates outside the
/// holiday table fall back to weekday rules instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("Invalid date '{input}': {message}")]
    InvalidDate { input: String, message: String },

    #[error("Unknown exchange timezone: {name}")]
    InvalidTimezone { name: String },

    #[error("Invalid holiday table: {message}")]
    InvalidTable { message: String },
}

/// Bar source failures. Local to the day being fetched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Bar source failed: {message}")]
    Source { message: String },

    #[error("Bar source timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("No bars returned for {ticker} ending {date}")]
    Empty { ticker: String, date: NaiveDate },

    #[error("Ticker not found: {ticker}")]
    SymbolNotFound { ticker: String },

    #[error("Fetch canceled")]
    Canceled,
}

impl FetchError {
    /// Transient failures are worth another attempt; the rest will not change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Source { .. } | FetchError::Timeout { .. })
    }
}

/// Errors raised while windowing a single day
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DayWindowError {
    #[error("Target date {date} is not a trading day")]
    InvalidTargetDay { date: NaiveDate },

    #[error("Ticker symbol is empty")]
    EmptyTicker,

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Result type alias for DaySlide operations
pub type DsResult<T> = Result<T, DsError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::DsError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::DsError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::DsError::Config(format!($($arg)*))
    };
}
