//! Billing period
//!
//! A structured `(year, month)` value used as the uniqueness key for
//! fee obligations. Free-text labels are parsed once at the edge and
//! never compared as strings.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const MONTH_NAMES: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

/// Errors produced while parsing a period label
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeriodError {
    #[error("Unrecognised period label: {0:?}")]
    Unrecognised(String),

    #[error("Month out of range: {0}")]
    MonthOutOfRange(u32),

    #[error("Year out of range: {0}")]
    YearOutOfRange(i32),
}

/// A calendar month, ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::MonthOutOfRange(month));
        }
        if !(1900..=9999).contains(&year) {
            return Err(PeriodError::YearOutOfRange(year));
        }
        Ok(Self { year, month })
    }

    /// The period containing `date`.
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// First day of the period.
    pub fn first_day(&self) -> NaiveDate {
        // month and year are validated on construction
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    /// Canonical storage key, e.g. `2025-01`.
    pub fn key(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTH_NAMES
        .iter()
        .position(|full| full.starts_with(&lower))
        .map(|idx| idx as u32 + 1)
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parts: Vec<&str> = trimmed
            .split(|c: char| c == '-' || c == ' ' || c == '_' || c == '/' || c == ',' || c == '.')
            .filter(|p| !p.is_empty())
            .collect();

        let unrecognised = || PeriodError::Unrecognised(s.to_string());

        if parts.len() != 2 {
            return Err(unrecognised());
        }

        let (first, second) = (parts[0], parts[1]);
        let first_numeric = first.chars().all(|c| c.is_ascii_digit());
        let second_numeric = second.chars().all(|c| c.is_ascii_digit());

        match (first_numeric, second_numeric) {
            // "Jan-2025", "January 2025"
            (false, true) => {
                let month = month_from_name(first).ok_or_else(unrecognised)?;
                let year: i32 = second.parse().map_err(|_| unrecognised())?;
                Period::new(expand_year(year, second.len()), month)
            }
            // "2025-Jan"
            (true, false) if first.len() == 4 => {
                let month = month_from_name(second).ok_or_else(unrecognised)?;
                let year: i32 = first.parse().map_err(|_| unrecognised())?;
                Period::new(year, month)
            }
            // "2025-01" or "01/2025"
            (true, true) => {
                if first.len() == 4 {
                    let year: i32 = first.parse().map_err(|_| unrecognised())?;
                    let month: u32 = second.parse().map_err(|_| unrecognised())?;
                    Period::new(year, month)
                } else {
                    let month: u32 = first.parse().map_err(|_| unrecognised())?;
                    let year: i32 = second.parse().map_err(|_| unrecognised())?;
                    Period::new(expand_year(year, second.len()), month)
                }
            }
            _ => Err(unrecognised()),
        }
    }
}

/// Two-digit years are read as 20xx.
fn expand_year(year: i32, digits: usize) -> i32 {
    if digits == 2 {
        2000 + year
    } else {
        year
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            MONTH_ABBREVIATIONS[(self.month - 1) as usize],
            self.year
        )
    }
}

impl TryFrom<String> for Period {
    type Error = PeriodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}
