//! Symbolic time windows
//!
//! The interpreter speaks in symbols such as `last_4_weeks`; they are resolved
//! to inclusive date ranges against an anchor date right before compilation.

use crate::error::{PipelineError, Result};
use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest rolling window accepted, in days.
const MAX_WINDOW_DAYS: u64 = 3_660;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeWindow {
    Today,
    Yesterday,
    LastDays(u32),
    LastWeeks(u32),
    LastMonths(u32),
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    ThisQuarter,
    LastQuarter,
    ThisYear,
    LastYear,
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ResolvedWindow {
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// The equal-length window ending the day before this one starts.
    pub fn prior(&self) -> Result<ResolvedWindow> {
        let end = sub_days(self.start, 1)?;
        let start = sub_days(end, (self.days() - 1) as u64)?;
        Ok(ResolvedWindow { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for ResolvedWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

impl TimeWindow {
    pub fn resolve(&self, anchor: NaiveDate) -> Result<ResolvedWindow> {
        let (start, end) = match *self {
            TimeWindow::Today => (anchor, anchor),
            TimeWindow::Yesterday => {
                let day = sub_days(anchor, 1)?;
                (day, day)
            }
            TimeWindow::LastDays(n) => (sub_days(anchor, rolling_days(n, 1)? - 1)?, anchor),
            TimeWindow::LastWeeks(n) => (sub_days(anchor, rolling_days(n, 7)? - 1)?, anchor),
            TimeWindow::LastMonths(n) => {
                if n == 0 || n > 120 {
                    return Err(invalid_window(&self.to_string()));
                }
                let back = anchor
                    .checked_sub_months(Months::new(n))
                    .ok_or_else(|| invalid_window(&self.to_string()))?;
                (add_days(back, 1)?, anchor)
            }
            TimeWindow::ThisWeek => (week_start(anchor)?, anchor),
            TimeWindow::LastWeek => {
                let end = sub_days(week_start(anchor)?, 1)?;
                (sub_days(end, 6)?, end)
            }
            TimeWindow::ThisMonth => (month_start(anchor)?, anchor),
            TimeWindow::LastMonth => {
                let end = sub_days(month_start(anchor)?, 1)?;
                (month_start(end)?, end)
            }
            TimeWindow::ThisQuarter => (quarter_start(anchor)?, anchor),
            TimeWindow::LastQuarter => {
                let end = sub_days(quarter_start(anchor)?, 1)?;
                (quarter_start(end)?, end)
            }
            TimeWindow::ThisYear => (ymd(anchor.year(), 1, 1)?, anchor),
            TimeWindow::LastYear => (ymd(anchor.year() - 1, 1, 1)?, ymd(anchor.year() - 1, 12, 31)?),
        };
        Ok(ResolvedWindow { start, end })
    }
}

fn rolling_days(n: u32, unit: u64) -> Result<u64> {
    let days = n as u64 * unit;
    if n == 0 || days > MAX_WINDOW_DAYS {
        return Err(PipelineError::Validation(format!(
            "rolling window of {} days is outside 1..={}",
            days, MAX_WINDOW_DAYS
        )));
    }
    Ok(days)
}

fn invalid_window(raw: &str) -> PipelineError {
    PipelineError::Validation(format!("unsupported time window '{}'", raw))
}

fn sub_days(date: NaiveDate, days: u64) -> Result<NaiveDate> {
    date.checked_sub_days(Days::new(days))
        .ok_or_else(|| PipelineError::Validation(format!("date out of range: {} - {}d", date, days)))
}

fn add_days(date: NaiveDate, days: u64) -> Result<NaiveDate> {
    date.checked_add_days(Days::new(days))
        .ok_or_else(|| PipelineError::Validation(format!("date out of range: {} + {}d", date, days)))
}

fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| PipelineError::Validation(format!("invalid date {}-{}-{}", year, month, day)))
}

fn week_start(date: NaiveDate) -> Result<NaiveDate> {
    sub_days(date, date.weekday().num_days_from_monday() as u64)
}

fn month_start(date: NaiveDate) -> Result<NaiveDate> {
    ymd(date.year(), date.month(), 1)
}

fn quarter_start(date: NaiveDate) -> Result<NaiveDate> {
    ymd(date.year(), (date.month0() / 3) * 3 + 1, 1)
}

impl FromStr for TimeWindow {
    type Err = PipelineError;

    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw
            .trim()
            .to_lowercase()
            .replace([' ', '-'], "_");
        let window = match normalized.as_str() {
            "today" => TimeWindow::Today,
            "yesterday" => TimeWindow::Yesterday,
            "this_week" | "wtd" => TimeWindow::ThisWeek,
            "last_week" => TimeWindow::LastWeek,
            "this_month" | "mtd" => TimeWindow::ThisMonth,
            "last_month" => TimeWindow::LastMonth,
            "this_quarter" | "qtd" => TimeWindow::ThisQuarter,
            "last_quarter" => TimeWindow::LastQuarter,
            "this_year" | "ytd" => TimeWindow::ThisYear,
            "last_year" => TimeWindow::LastYear,
            other => {
                let parts: Vec<&str> = other.split('_').collect();
                match parts.as_slice() {
                    ["last", n, unit] => {
                        let n: u32 = n.parse().map_err(|_| invalid_window(raw))?;
                        match *unit {
                            "day" | "days" => TimeWindow::LastDays(n),
                            "week" | "weeks" => TimeWindow::LastWeeks(n),
                            "month" | "months" => TimeWindow::LastMonths(n),
                            _ => return Err(invalid_window(raw)),
                        }
                    }
                    _ => return Err(invalid_window(raw)),
                }
            }
        };
        Ok(window)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeWindow::Today => write!(f, "today"),
            TimeWindow::Yesterday => write!(f, "yesterday"),
            TimeWindow::LastDays(n) => write!(f, "last_{}_days", n),
            TimeWindow::LastWeeks(n) => write!(f, "last_{}_weeks", n),
            TimeWindow::LastMonths(n) => write!(f, "last_{}_months", n),
            TimeWindow::ThisWeek => write!(f, "this_week"),
            TimeWindow::LastWeek => write!(f, "last_week"),
            TimeWindow::ThisMonth => write!(f, "this_month"),
            TimeWindow::LastMonth => write!(f, "last_month"),
            TimeWindow::ThisQuarter => write!(f, "this_quarter"),
            TimeWindow::LastQuarter => write!(f, "last_quarter"),
            TimeWindow::ThisYear => write!(f, "this_year"),
            TimeWindow::LastYear => write!(f, "last_year"),
        }
    }
}

impl TryFrom<String> for TimeWindow {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeWindow> for String {
    fn from(window: TimeWindow) -> Self {
        window.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_symbols() {
        assert_eq!("last_4_weeks".parse::<TimeWindow>().unwrap(), TimeWindow::LastWeeks(4));
        assert_eq!("Last 7 days".parse::<TimeWindow>().unwrap(), TimeWindow::LastDays(7));
        assert_eq!("this_month".parse::<TimeWindow>().unwrap(), TimeWindow::ThisMonth);
        assert!("next_week".parse::<TimeWindow>().is_err());
        assert!("last_x_weeks".parse::<TimeWindow>().is_err());
    }

    #[test]
    fn test_last_4_weeks_is_28_days_ending_on_anchor() {
        let window = TimeWindow::LastWeeks(4).resolve(date(2026, 10, 17)).unwrap();
        assert_eq!(window.start, date(2026, 9, 20));
        assert_eq!(window.end, date(2026, 10, 17));
        assert_eq!(window.days(), 28);

        let prior = window.prior().unwrap();
        assert_eq!(prior.end, date(2026, 9, 19));
        assert_eq!(prior.days(), 28);
    }

    #[test]
    fn test_calendar_windows() {
        let anchor = date(2026, 10, 17);
        let last_month = TimeWindow::LastMonth.resolve(anchor).unwrap();
        assert_eq!((last_month.start, last_month.end), (date(2026, 9, 1), date(2026, 9, 30)));

        let last_quarter = TimeWindow::LastQuarter.resolve(anchor).unwrap();
        assert_eq!((last_quarter.start, last_quarter.end), (date(2026, 7, 1), date(2026, 9, 30)));

        // 2026-10-17 is a Saturday.
        let this_week = TimeWindow::ThisWeek.resolve(anchor).unwrap();
        assert_eq!(this_week.start, date(2026, 10, 12));
    }

    #[test]
    fn test_zero_length_window_rejected() {
        assert!(TimeWindow::LastDays(0).resolve(date(2026, 1, 1)).is_err());
    }

    #[test]
    fn test_serde_as_symbol() {
        let json = serde_json::to_string(&TimeWindow::LastWeeks(4)).unwrap();
        assert_eq!(json, "\"last_4_weeks\"");
        let back: TimeWindow = serde_json::from_str("\"last_month\"").unwrap();
        assert_eq!(back, TimeWindow::LastMonth);
    }
}
