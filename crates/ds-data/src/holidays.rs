//! Versioned, year-keyed holiday and early-close table.
//!
//! The table is data: supporting a new year means adding a `years` entry,
//! never touching calendar logic. Load it once at startup (built-in, JSON
//! string, or JSON file) and share it immutably behind an `Arc`.

use chrono::{Datelike, NaiveDate, Weekday};
use ds_types::{CalendarError, DsResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Exchange closures and shortened sessions for one year
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearTable {
    #[serde(default)]
    pub holidays: BTreeSet<NaiveDate>,
    #[serde(default)]
    pub early_closes: BTreeSet<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolidayTable {
    pub version: String,
    pub years: BTreeMap<i32, YearTable>,
}

impl HolidayTable {
    /// Build a table and check it for internal consistency.
    pub fn new(version: impl Into<String>, years: BTreeMap<i32, YearTable>) -> Result<Self, CalendarError> {
        let table = Self {
            version: version.into(),
            years,
        };
        table.validate()?;
        Ok(table)
    }

    /// Table with no entries: every weekday is a full session.
    pub fn empty() -> Self {
        Self {
            version: "empty".to_string(),
            years: BTreeMap::new(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, CalendarError> {
        let table: Self = serde_json::from_str(json).map_err(|e| CalendarError::InvalidTable {
            message: e.to_string(),
        })?;
        table.validate()?;
        Ok(table)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> DsResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let table = Self::from_json_str(&raw)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            version = %table.version,
            years = table.years.len(),
            "loaded holiday table"
        );
        Ok(table)
    }

    pub fn covers_year(&self, year: i32) -> bool {
        self.years.contains_key(&year)
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.years
            .get(&date.year())
            .is_some_and(|y| y.holidays.contains(&date))
    }

    pub fn is_early_close(&self, date: NaiveDate) -> bool {
        self.years
            .get(&date.year())
            .is_some_and(|y| y.early_closes.contains(&date))
    }

    fn validate(&self) -> Result<(), CalendarError> {
        for (year, entry) in &self.years {
            for date in entry.holidays.iter().chain(entry.early_closes.iter()) {
                if date.year() != *year {
                    return Err(CalendarError::InvalidTable {
                        message: format!("{date} listed under year {year}"),
                    });
                }
                if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                    return Err(CalendarError::InvalidTable {
                        message: format!("{date} falls on a weekend"),
                    });
                }
            }
            if let Some(date) = entry.holidays.intersection(&entry.early_closes).next() {
                return Err(CalendarError::InvalidTable {
                    message: format!("{date} is both a holiday and an early close"),
                });
            }
        }
        Ok(())
    }

    /// NYSE observed holidays and 13:00 early closes, 2023-2027.
    pub fn nyse() -> Self {
        let rows: [(i32, &[(u32, u32)], &[(u32, u32)]); 5] = [
            (
                2023,
                &[(1, 2), (1, 16), (2, 20), (4, 7), (5, 29), (6, 19), (7, 4), (9, 4), (11, 23), (12, 25)],
                &[(7, 3), (11, 24)],
            ),
            (
                2024,
                &[(1, 1), (1, 15), (2, 19), (3, 29), (5, 27), (6, 19), (7, 4), (9, 2), (11, 28), (12, 25)],
                &[(7, 3), (11, 29), (12, 24)],
            ),
            (
                2025,
                &[(1, 1), (1, 9), (1, 20), (2, 17), (4, 18), (5, 26), (6, 19), (7, 4), (9, 1), (11, 27), (12, 25)],
                &[(7, 3), (11, 28), (12, 24)],
            ),
            (
                2026,
                &[(1, 1), (1, 19), (2, 16), (4, 3), (5, 25), (6, 19), (7, 3), (9, 7), (11, 26), (12, 25)],
                &[(11, 27), (12, 24)],
            ),
            (
                2027,
                &[(1, 1), (1, 18), (2, 15), (3, 26), (5, 31), (6, 18), (7, 5), (9, 6), (11, 25), (12, 24)],
                &[(11, 26)],
            ),
        ];

        let to_dates = |year: i32, days: &[(u32, u32)]| -> BTreeSet<NaiveDate> {
            days.iter()
                .filter_map(|&(m, d)| NaiveDate::from_ymd_opt(year, m, d))
                .collect()
        };

        let years = rows
            .iter()
            .map(|(year, holidays, early)| {
                (
                    *year,
                    YearTable {
                        holidays: to_dates(*year, holidays),
                        early_closes: to_dates(*year, early),
                    },
                )
            })
            .collect();

        Self {
            version: "nyse-2023-2027.1".to_string(),
            years,
        }
    }
}

impl Default for HolidayTable {
    fn default() -> Self {
        Self::nyse()
    }
}
