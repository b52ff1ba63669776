use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use csv::ReaderBuilder;
use ds_types::{Bar, FetchError, Ticker, Timeframe};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::calendar::TradingCalendar;

/// Source of raw OHLCV bars (HTTP vendor, local files, test stubs).
///
/// Returns bars for `ticker` covering `lookback_days` calendar days that end
/// at `end_date`, sorted ascending. Implementations may return bars past the
/// end of `end_date`'s session; the window builder trims them.
#[async_trait]
pub trait BarSource: Send + Sync + std::fmt::Debug {
    async fn fetch_bars(
        &self,
        ticker: &Ticker,
        timeframe: Timeframe,
        lookback_days: u32,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError>;

    /// Get source name
    fn name(&self) -> &str;
}

/// Deterministic synthetic bars for demos and tests
#[derive(Debug, Clone)]
pub struct SampleBarSource {
    pub name: String,
    calendar: TradingCalendar,
    tickers: Option<HashSet<String>>,
    failing_dates: HashSet<NaiveDate>,
}

impl SampleBarSource {
    pub fn new(calendar: TradingCalendar) -> Self {
        Self {
            name: "Sample Bar Source".to_string(),
            calendar,
            tickers: None,
            failing_dates: HashSet::new(),
        }
    }

    /// Only serve these tickers; anything else is `SymbolNotFound`.
    pub fn with_tickers<I, S>(mut self, tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tickers = Some(
            tickers
                .into_iter()
                .map(|t| t.as_ref().to_ascii_uppercase())
                .collect(),
        );
        self
    }

    /// Fail every request whose end date is `date`.
    pub fn failing_on(mut self, date: NaiveDate) -> Self {
        self.failing_dates.insert(date);
        self
    }

    fn base_price(ticker: &Ticker) -> Decimal {
        match ticker.as_str() {
            "AAPL" => Decimal::from(190),
            "MSFT" => Decimal::from(420),
            "SPY" => Decimal::from(560),
            "TSLA" => Decimal::from(250),
            _ => Decimal::from(100),
        }
    }

    fn seed(ticker: &Ticker) -> u64 {
        ticker
            .as_str()
            .bytes()
            .fold(12345u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
    }

    fn bar_times(&self, timeframe: Timeframe, start: NaiveDate, end_date: NaiveDate) -> Vec<DateTime<Utc>> {
        let sessions = self.calendar.trading_days_between(start, end_date);
        if !timeframe.is_intraday() {
            // Vendors commonly stamp daily bars at midnight UTC of the session date
            return sessions.iter().map(|s| s.date.and_time(chrono::NaiveTime::MIN).and_utc()).collect();
        }

        let step = chrono::Duration::seconds(timeframe.to_seconds() as i64);
        let mut times = Vec::new();
        for session in sessions {
            let mut t = session.market_open;
            while t < session.market_close {
                times.push(t);
                t += step;
            }
        }
        times
    }
}

#[async_trait]
impl BarSource for SampleBarSource {
    async fn fetch_bars(
        &self,
        ticker: &Ticker,
        timeframe: Timeframe,
        lookback_days: u32,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError> {
        if let Some(tickers) = &self.tickers {
            if !tickers.contains(ticker.as_str()) {
                return Err(FetchError::SymbolNotFound {
                    ticker: ticker.to_string(),
                });
            }
        }
        if self.failing_dates.contains(&end_date) {
            return Err(FetchError::Source {
                message: format!("sample source configured to fail on {end_date}"),
            });
        }

        let start = end_date
            .checked_sub_days(Days::new(lookback_days as u64))
            .unwrap_or(end_date);

        let mut rng_state = Self::seed(ticker);
        let mut price = Self::base_price(ticker);
        let spread = Decimal::new(5, 3); // 0.5% high/low excursion

        let bars = self
            .bar_times(timeframe, start, end_date)
            .into_iter()
            .map(|timestamp| {
                // Simple random walk
                rng_state = rng_state.wrapping_mul(1103515245).wrapping_add(12345);
                let random = (rng_state >> 33) as f64 / (1u64 << 31) as f64 - 0.5; // -0.5 to 0.5
                let change = Decimal::from_f64_retain(random * 0.02).unwrap_or_default();

                let open = price;
                let close = (price * (Decimal::ONE + change)).round_dp(2);
                let high = (open.max(close) * (Decimal::ONE + spread)).round_dp(2);
                let low = (open.min(close) * (Decimal::ONE - spread)).round_dp(2);
                price = close;

                Bar::new(timestamp, open, high, low, close, Decimal::from(1_000_000))
            })
            .collect();

        Ok(bars)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Bars from local CSV files named by `file_pattern`
#[derive(Debug)]
pub struct CsvBarSource {
    pub name: String,
    pub data_directory: PathBuf,
    pub file_pattern: String,
}

#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(alias = "Date", alias = "date", alias = "Timestamp", alias = "time")]
    timestamp: String,
    #[serde(alias = "Open", alias = "open")]
    open: Decimal,
    #[serde(alias = "High", alias = "high")]
    high: Decimal,
    #[serde(alias = "Low", alias = "low")]
    low: Decimal,
    #[serde(alias = "Close", alias = "close")]
    close: Decimal,
    #[serde(alias = "Volume", alias = "volume")]
    volume: Decimal,
}

impl CsvBarSource {
    pub fn new<P: AsRef<Path>>(data_directory: P) -> Self {
        Self {
            name: "CSV Bar Source".to_string(),
            data_directory: data_directory.as_ref().to_path_buf(),
            file_pattern: "{ticker}_{timeframe}.csv".to_string(),
        }
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.file_pattern = pattern.to_string();
        self
    }

    fn file_path(&self, ticker: &Ticker, timeframe: Timeframe) -> PathBuf {
        let filename = self
            .file_pattern
            .replace("{ticker}", ticker.as_str())
            .replace("{timeframe}", &timeframe.to_string());

        self.data_directory.join(filename)
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), `YYYY-MM-DD` (midnight UTC)
/// or epoch milliseconds.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(millis) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.and_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
        })
}

#[async_trait]
impl BarSource for CsvBarSource {
    async fn fetch_bars(
        &self,
        ticker: &Ticker,
        timeframe: Timeframe,
        lookback_days: u32,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError> {
        let file_path = self.file_path(ticker, timeframe);

        let contents = match tokio::fs::read(&file_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FetchError::SymbolNotFound {
                    ticker: ticker.to_string(),
                });
            }
            Err(e) => {
                return Err(FetchError::Source {
                    message: format!("{}: {}", file_path.display(), e),
                });
            }
        };

        // Bounded by UTC date with one day of slack past `end_date`, so
        // evening bars in western exchange timezones are not lost.
        let window_start = end_date
            .checked_sub_days(Days::new(lookback_days as u64))
            .unwrap_or(end_date)
            .and_time(chrono::NaiveTime::MIN)
            .and_utc();
        let window_end = end_date
            .checked_add_days(Days::new(2))
            .unwrap_or(end_date)
            .and_time(chrono::NaiveTime::MIN)
            .and_utc();

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(contents.as_slice());

        let mut bars = Vec::new();
        for result in reader.deserialize() {
            let record: CsvRecord = result.map_err(|e| FetchError::Source {
                message: format!("CSV parsing error: {}", e),
            })?;

            let timestamp = parse_timestamp(&record.timestamp).ok_or_else(|| FetchError::Source {
                message: format!("Unparseable timestamp '{}'", record.timestamp),
            })?;

            if timestamp >= window_start && timestamp < window_end {
                bars.push(Bar::new(
                    timestamp,
                    record.open,
                    record.high,
                    record.low,
                    record.close,
                    record.volume,
                ));
            }
        }

        bars.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        tracing::debug!(
            ticker = %ticker,
            file = %file_path.display(),
            bars = bars.len(),
            "read bars from csv"
        );
        Ok(bars)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
