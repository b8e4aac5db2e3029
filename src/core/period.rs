//! Pay period value type.
//!
//! Periods are calendar months written `YYYY-MM`. They are stored as text, and the
//! zero-padded form sorts lexicographically in calendar order.

use crate::errors::{Error, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A calendar month used as a payroll or accrual period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// Builds a period, rejecting months outside 1-12.
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) || !(1900..=9999).contains(&year) {
            return Err(Error::validation(format!(
                "Invalid pay period {year:04}-{month:02}"
            )));
        }
        Ok(Self { year, month })
    }

    /// The period containing `date`.
    #[must_use]
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The period containing today's date (UTC).
    #[must_use]
    pub fn current() -> Self {
        Self::containing(chrono::Utc::now().date_naive())
    }

    /// Calendar year of the period
    #[must_use]
    pub const fn year(self) -> i32 {
        self.year
    }

    /// Month of the period, 1-12
    #[must_use]
    pub const fn month(self) -> u32 {
        self.month
    }

    /// The following month.
    #[must_use]
    pub const fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::validation(format!("Pay period must be YYYY-MM, got '{s}'"));
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for Period {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(value: Period) -> Self {
        value.to_string()
    }
}
