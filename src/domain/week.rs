use std::error::Error;
use std::fmt;

use time::macros::format_description;
use time::{Date, Duration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDate {
    pub value: String,
}

impl fmt::Display for InvalidDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid ISO date '{}': expected YYYY-MM-DD", self.value)
    }
}

impl Error for InvalidDate {}

/// Parses a canonical `YYYY-MM-DD` date. Padding, signs, and extra digits
/// are rejected so each calendar day has exactly one key.
pub fn parse_iso_date(raw: &str) -> Result<Date, InvalidDate> {
    let invalid = || InvalidDate {
        value: raw.to_string(),
    };
    let date = Date::parse(raw, format_description!("[year]-[month]-[day]")).map_err(|_| invalid())?;
    if format_iso_date(date) != raw {
        return Err(invalid());
    }
    Ok(date)
}

pub fn format_iso_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Sunday at or before `date`.
pub fn week_start_for(date: Date) -> Date {
    let back = i64::from(date.weekday().number_days_from_sunday());
    date - Duration::days(back)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekWindow {
    pub start: Date,
    pub end: Date,
}

impl WeekWindow {
    pub fn containing(date: Date) -> Self {
        let start = week_start_for(date);
        Self {
            start,
            end: start + Duration::days(6),
        }
    }

    pub fn containing_iso(raw: &str) -> Result<Self, InvalidDate> {
        Ok(Self::containing(parse_iso_date(raw)?))
    }

    pub fn start_key(&self) -> String {
        format_iso_date(self.start)
    }

    pub fn end_key(&self) -> String {
        format_iso_date(self.end)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        parse_iso_date(key)
            .map(|date| date >= self.start && date <= self.end)
            .unwrap_or(false)
    }
}
