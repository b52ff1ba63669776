//! Day navigation state machine.
//!
//! [`ChartDayState`] is an immutable value; [`ChartDayState::apply`] returns
//! the next state for a [`NavAction`]. Requests that would leave
//! `[min_backward_offset, max_forward_offset]` return the state unchanged,
//! mirroring disabled navigation buttons rather than an error.

use chrono::{DateTime, NaiveDate, Utc};
use ds_data::TradingCalendar;
use ds_types::CalendarError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Transitions accepted by [`ChartDayState::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavAction {
    NextDay,
    PreviousDay,
    GoToOffset(i32),
    ResetToReference,
    SetLoading(bool),
    SetDataArrived,
}

impl NavAction {
    /// True for transitions that change the displayed day.
    pub fn is_movement(&self) -> bool {
        matches!(
            self,
            NavAction::NextDay | NavAction::PreviousDay | NavAction::GoToOffset(_) | NavAction::ResetToReference
        )
    }
}

/// How far navigation may move around the reference day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationBounds {
    /// Non-positive; how many sessions of pre-pattern context are reachable
    pub min_backward_offset: i32,
    /// Forward cap before the "no later than today" limit is applied
    pub max_days: u32,
}

impl Default for NavigationBounds {
    fn default() -> Self {
        Self {
            min_backward_offset: -5,
            max_days: 10,
        }
    }
}

/// Built only through [`ChartDayState::new`] and [`ChartDayState::apply`];
/// serializes for the rendering layer but does not deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartDayState {
    reference_day: NaiveDate,
    current_day: NaiveDate,
    offset: i32,
    max_forward_offset: i32,
    min_backward_offset: i32,
    is_loading: bool,
    has_data: bool,
    adjusted_from: Option<NaiveDate>,
}

impl ChartDayState {
    /// Initial state anchored at `reference_day`.
    ///
    /// A non-trading reference day is moved to the previous session and the
    /// original date is kept in [`ChartDayState::adjusted_from`]. The forward
    /// bound never reaches past the exchange date of `now`.
    pub fn new(
        reference_day: NaiveDate,
        calendar: &TradingCalendar,
        bounds: NavigationBounds,
        now: DateTime<Utc>,
    ) -> Self {
        let resolved = calendar.trading_day_on_or_before(reference_day);
        let adjusted_from = (resolved != reference_day).then_some(reference_day);
        if let Some(requested) = adjusted_from {
            warn!(
                %requested,
                resolved = %resolved,
                "reference day is not a trading day; anchoring on the previous session"
            );
        }

        let available = calendar.trading_days_after(resolved, calendar.exchange_date(now));
        let max_forward_offset = i32::try_from(available)
            .unwrap_or(i32::MAX)
            .min(i32::try_from(bounds.max_days).unwrap_or(i32::MAX));

        Self {
            reference_day: resolved,
            current_day: resolved,
            offset: 0,
            max_forward_offset,
            min_backward_offset: bounds.min_backward_offset.min(0),
            is_loading: false,
            has_data: false,
            adjusted_from,
        }
    }

    /// Parse a `YYYY-MM-DD` reference date and build the initial state.
    pub fn from_reference_str(
        reference: &str,
        calendar: &TradingCalendar,
        bounds: NavigationBounds,
        now: DateTime<Utc>,
    ) -> Result<Self, CalendarError> {
        let date = TradingCalendar::parse_date(reference)?;
        Ok(Self::new(date, calendar, bounds, now))
    }

    /// Next state for `action`.
    pub fn apply(&self, action: NavAction, calendar: &TradingCalendar) -> Self {
        match action {
            NavAction::NextDay => {
                if self.offset >= self.max_forward_offset {
                    return self.clone();
                }
                self.moved_to(self.offset + 1, calendar.next_trading_day(self.current_day))
            }
            NavAction::PreviousDay => {
                if self.offset <= self.min_backward_offset {
                    return self.clone();
                }
                self.moved_to(self.offset - 1, calendar.previous_trading_day(self.current_day))
            }
            NavAction::GoToOffset(n) => {
                if !self.in_bounds(n) {
                    return self.clone();
                }
                self.moved_to(n, calendar.offset_trading_day(self.reference_day, n))
            }
            NavAction::ResetToReference => self.moved_to(0, self.reference_day),
            NavAction::SetLoading(is_loading) => Self {
                is_loading,
                ..self.clone()
            },
            NavAction::SetDataArrived => Self {
                is_loading: false,
                has_data: true,
                ..self.clone()
            },
        }
    }

    fn moved_to(&self, offset: i32, current_day: NaiveDate) -> Self {
        Self {
            offset,
            current_day,
            is_loading: true,
            has_data: false,
            ..self.clone()
        }
    }

    pub fn in_bounds(&self, offset: i32) -> bool {
        (self.min_backward_offset..=self.max_forward_offset).contains(&offset)
    }

    pub fn can_go_forward(&self) -> bool {
        self.offset < self.max_forward_offset
    }

    pub fn can_go_back(&self) -> bool {
        self.offset > self.min_backward_offset
    }

    pub fn reference_day(&self) -> NaiveDate {
        self.reference_day
    }

    pub fn current_day(&self) -> NaiveDate {
        self.current_day
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }

    pub fn max_forward_offset(&self) -> i32 {
        self.max_forward_offset
    }

    pub fn min_backward_offset(&self) -> i32 {
        self.min_backward_offset
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// The requested reference date, if it had to be moved to a trading day.
    pub fn adjusted_from(&self) -> Option<NaiveDate> {
        self.adjusted_from
    }
}
