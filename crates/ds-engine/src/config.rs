use ds_data::{CalendarConfig, HolidayTable, PrefetchConfig, TradingCalendar, WindowConfig};
use ds_types::{config_error, DsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::navigation::NavigationBounds;

/// Environment variable naming a JSON engine config file
pub const CONFIG_ENV_VAR: &str = "DAYSLIDE_CONFIG";

/// Engine configuration. Every field has a default, so a config file only
/// needs the values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub calendar: CalendarConfig,
    /// Holiday table JSON; the built-in NYSE table is used when absent
    pub holiday_table_path: Option<PathBuf>,
    pub window: WindowConfig,
    pub prefetch: PrefetchConfig,
    pub min_backward_offset: i32,
    pub max_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            calendar: CalendarConfig::default(),
            holiday_table_path: None,
            window: WindowConfig::default(),
            prefetch: PrefetchConfig {
                backward_days: 5,
                ..Default::default()
            },
            min_backward_offset: -5,
            max_days: 10,
        }
    }
}

impl EngineConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> DsResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), "loaded engine config");
        Ok(config)
    }

    /// Load from the file named by `DAYSLIDE_CONFIG`, or defaults if unset.
    pub fn from_env() -> DsResult<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> DsResult<()> {
        if self.min_backward_offset > 0 {
            return Err(config_error!(
                "min_backward_offset must be <= 0, got {}",
                self.min_backward_offset
            ));
        }
        if self.prefetch.concurrency == 0 {
            return Err(config_error!("prefetch.concurrency must be at least 1"));
        }
        if self.prefetch.max_attempts == 0 {
            return Err(config_error!("prefetch.max_attempts must be at least 1"));
        }
        if self.window.fetch_timeout_ms == 0 {
            return Err(config_error!("window.fetch_timeout_ms must be positive"));
        }
        Ok(())
    }

    pub fn bounds(&self) -> NavigationBounds {
        NavigationBounds {
            min_backward_offset: self.min_backward_offset,
            max_days: self.max_days,
        }
    }

    pub fn build_calendar(&self) -> DsResult<TradingCalendar> {
        let table = match &self.holiday_table_path {
            Some(path) => HolidayTable::from_path(path)?,
            None => HolidayTable::nyse(),
        };
        Ok(TradingCalendar::new(Arc::new(table), self.calendar.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ds_types::DsError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_days, 10);
        assert_eq!(config.min_backward_offset, -5);
        assert_eq!(config.prefetch.backward_days, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_temp(r#"{ "max_days": 3, "prefetch": { "concurrency": 2, "max_attempts": 3, "retry_backoff_ms": 10, "backward_days": 1 } }"#);
        let config = EngineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.max_days, 3);
        assert_eq!(config.prefetch.concurrency, 2);
        assert_eq!(config.min_backward_offset, -5);
        assert_eq!(config.calendar, CalendarConfig::default());
    }

    #[test]
    fn test_partial_nested_sections() {
        let file = write_temp(
            r#"{ "prefetch": { "concurrency": 2 }, "window": { "fetch_timeout_ms": 500, "intraday_lookback": { "hour": 10 } }, "calendar": { "timezone": "America/Chicago" } }"#,
        );
        let config = EngineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.prefetch.concurrency, 2);
        assert_eq!(config.prefetch.max_attempts, 1);
        assert_eq!(config.window.fetch_timeout_ms, 500);
        assert_eq!(config.window.daily_lookback_days, 120);
        assert_eq!(config.window.intraday_lookback.hour, 10);
        assert_eq!(config.window.intraday_lookback.minute, 3);
        assert_eq!(config.calendar.timezone, "America/Chicago");
        assert_eq!(config.calendar.market_open, CalendarConfig::default().market_open);
    }

    #[test]
    fn test_rejects_positive_backward_offset() {
        let file = write_temp(r#"{ "min_backward_offset": 2 }"#);
        let err = EngineConfig::from_path(file.path()).unwrap_err();
        assert!(matches!(err, DsError::Config(_)));
    }

    #[test]
    fn test_malformed_file() {
        let file = write_temp("{ not json");
        assert!(matches!(
            EngineConfig::from_path(file.path()).unwrap_err(),
            DsError::Serialization(_)
        ));
        assert!(matches!(
            EngineConfig::from_path("/nonexistent/dayslide.json").unwrap_err(),
            DsError::Io(_)
        ));
    }

    #[test]
    fn test_build_calendar_with_custom_table() {
        let table = write_temp(
            r#"{ "version": "test", "years": { "2030": { "holidays": ["2030-01-01"], "early_closes": ["2030-07-03"] } } }"#,
        );
        let config = EngineConfig {
            holiday_table_path: Some(table.path().to_path_buf()),
            ..Default::default()
        };
        let calendar = config.build_calendar().unwrap();
        let d = |m, day| NaiveDate::from_ymd_opt(2030, m, day).unwrap();
        assert!(!calendar.is_trading_day(d(1, 1)));
        assert!(calendar.is_early_close_day(d(7, 3)));
        assert!(calendar.covers_year(2030));
        assert!(!calendar.covers_year(2025));
    }

    #[test]
    fn test_build_calendar_rejects_bad_timezone() {
        let config = EngineConfig {
            calendar: CalendarConfig {
                timezone: "Mars/Olympus_Mons".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(config.build_calendar().unwrap_err(), DsError::Calendar(_)));
    }
}
