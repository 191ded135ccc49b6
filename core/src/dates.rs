//! Date literals accepted by the query language and their time ranges.

use chrono::{Days, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::query::{Period, PeriodUnit};

/// A date as written in a query: a whole day or a minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateValue {
    Day(NaiveDate),
    Minute(NaiveDateTime),
}

impl DateValue {
    /// Parse `YYYY-MM-DD` or `YYYY-MM-DD HH:MM`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Some(DateValue::Day(day));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
            .ok()
            .map(DateValue::Minute)
    }

    /// `NOW()` shifted by an optional period, as a whole day.
    pub fn now(today: NaiveDate, period: Option<Period>) -> Option<Self> {
        let day = match period {
            None => Some(today),
            Some(Period { amount, unit }) => shift(today, amount, unit),
        }?;
        Some(DateValue::Day(day))
    }

    /// Inclusive start of the covered range.
    pub fn start(&self) -> NaiveDateTime {
        match self {
            DateValue::Day(day) => day.and_time(NaiveTime::MIN),
            DateValue::Minute(at) => *at,
        }
    }

    /// Exclusive end of the covered range. `None` on the last representable day.
    pub fn end(&self) -> Option<NaiveDateTime> {
        match self {
            DateValue::Day(_) => self.start().checked_add_signed(TimeDelta::days(1)),
            DateValue::Minute(at) => at.checked_add_signed(TimeDelta::minutes(1)),
        }
    }
}

fn shift(day: NaiveDate, amount: i64, unit: PeriodUnit) -> Option<NaiveDate> {
    let magnitude = amount.unsigned_abs();
    match unit {
        PeriodUnit::Day => step_days(day, amount, magnitude),
        PeriodUnit::Week => step_days(day, amount, magnitude.checked_mul(7)?),
        PeriodUnit::Month => step_months(day, amount, magnitude),
        PeriodUnit::Year => step_months(day, amount, magnitude.checked_mul(12)?),
    }
}

fn step_days(day: NaiveDate, amount: i64, days: u64) -> Option<NaiveDate> {
    if amount < 0 {
        day.checked_sub_days(Days::new(days))
    } else {
        day.checked_add_days(Days::new(days))
    }
}

fn step_months(day: NaiveDate, amount: i64, months: u64) -> Option<NaiveDate> {
    let months = Months::new(u32::try_from(months).ok()?);
    if amount < 0 {
        day.checked_sub_months(months)
    } else {
        day.checked_add_months(months)
    }
}
