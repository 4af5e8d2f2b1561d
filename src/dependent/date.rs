// src/dependent/date.rs

//! Date windows a dependent item checks, relative to a business date.
//!
//! Every date value expands to one or more `[start, end)` intervals. An item
//! is satisfied only when every interval is.

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use crate::dependent::model::DependentCycle;
use crate::errors::{DagflowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateInterval {
    pub start: NaiveDateTime,
    /// Exclusive.
    pub end: NaiveDateTime,
}

impl DateInterval {
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        t >= self.start && t < self.end
    }
}

/// Expand `date_value` of `cycle` into intervals around `business`.
pub fn date_intervals(
    business: NaiveDateTime,
    cycle: DependentCycle,
    date_value: &str,
) -> Result<Vec<DateInterval>> {
    let today = business.date();
    let intervals = match (cycle, date_value) {
        (DependentCycle::Hour, "currentHour") => last_hours(business, 0, 0),
        (DependentCycle::Hour, "last1Hour") => last_hours(business, 1, 1),
        (DependentCycle::Hour, "last2Hours") => last_hours(business, 1, 2),
        (DependentCycle::Hour, "last3Hours") => last_hours(business, 1, 3),
        (DependentCycle::Hour, "last24Hours") => last_hours(business, 1, 24),

        (DependentCycle::Day, "today") => day(today).map(|d| vec![d]),
        (DependentCycle::Day, "last1Days") => last_days(today, 1),
        (DependentCycle::Day, "last2Days") => last_days(today, 2),
        (DependentCycle::Day, "last3Days") => last_days(today, 3),
        (DependentCycle::Day, "last7Days") => last_days(today, 7),

        (DependentCycle::Week, "thisWeek") => days_between(monday_of(today), today),
        (DependentCycle::Week, "lastWeek") => last_monday(today)
            .and_then(|monday| days_between(monday, monday.checked_add_days(Days::new(6))?)),
        (DependentCycle::Week, value) if weekday_offset(value).is_some() => {
            let offset = weekday_offset(value).unwrap_or_default();
            last_monday(today)
                .and_then(|monday| monday.checked_add_days(Days::new(offset)))
                .and_then(day)
                .map(|d| vec![d])
        }

        (DependentCycle::Month, "thisMonth") => {
            today.with_day(1).and_then(|first| days_between(first, today))
        }
        (DependentCycle::Month, "lastMonth") => {
            last_month(today).and_then(|(first, last)| days_between(first, last))
        }
        (DependentCycle::Month, "lastMonthBegin") => last_month(today)
            .and_then(|(first, _)| day(first))
            .map(|d| vec![d]),
        (DependentCycle::Month, "lastMonthEnd") => last_month(today)
            .and_then(|(_, last)| day(last))
            .map(|d| vec![d]),

        _ => {
            return Err(DagflowError::DependentConfig(format!(
                "unknown date value '{date_value}' for cycle '{cycle}'"
            )));
        }
    };

    intervals.ok_or_else(|| {
        DagflowError::DependentConfig(format!(
            "date value '{date_value}' out of range for business date {business}"
        ))
    })
}

fn weekday_offset(value: &str) -> Option<u64> {
    let offset = match value {
        "lastMonday" => 0,
        "lastTuesday" => 1,
        "lastWednesday" => 2,
        "lastThursday" => 3,
        "lastFriday" => 4,
        "lastSaturday" => 5,
        "lastSunday" => 6,
        _ => return None,
    };
    Some(offset)
}

fn day(date: NaiveDate) -> Option<DateInterval> {
    Some(DateInterval {
        start: date.and_time(NaiveTime::MIN),
        end: date.succ_opt()?.and_time(NaiveTime::MIN),
    })
}

fn hour_start(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date().and_hms_opt(t.hour(), 0, 0)
}

/// Hourly intervals `from..=to` hours before the business hour, oldest first.
fn last_hours(business: NaiveDateTime, from: i64, to: i64) -> Option<Vec<DateInterval>> {
    let current = hour_start(business)?;
    (from..=to)
        .rev()
        .map(|back| {
            let start = current.checked_sub_signed(TimeDelta::hours(back))?;
            Some(DateInterval {
                start,
                end: start.checked_add_signed(TimeDelta::hours(1))?,
            })
        })
        .collect()
}

/// The `n` whole days before `today`, oldest first.
fn last_days(today: NaiveDate, n: u64) -> Option<Vec<DateInterval>> {
    (1..=n)
        .rev()
        .map(|back| today.checked_sub_days(Days::new(back)).and_then(day))
        .collect()
}

fn days_between(first: NaiveDate, last: NaiveDate) -> Option<Vec<DateInterval>> {
    first
        .iter_days()
        .take_while(|d| *d <= last)
        .map(day)
        .collect()
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    let back = u64::from(date.weekday().num_days_from_monday());
    date.checked_sub_days(Days::new(back)).unwrap_or(date)
}

fn last_monday(today: NaiveDate) -> Option<NaiveDate> {
    monday_of(today).checked_sub_days(Days::new(7))
}

/// First and last day of the month before `today`.
fn last_month(today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let last = today.with_day(1)?.pred_opt()?;
    Some((last.with_day(1)?, last))
}
