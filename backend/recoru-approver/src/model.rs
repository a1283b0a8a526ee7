// src/model.rs

use chrono::{Datelike, NaiveDate};
use std::fmt;
use thiserror::Error;

// --- Period ---

/// A reporting month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodRejection {
    #[error("月は1〜12で入力してください (got {0})")]
    MonthOutOfRange(u32),
    #[error("{0} は選択可能な範囲 (2020年1月〜) より前です")]
    BeforeEarliest(Period),
    #[error("{0} は未来の年月です (最新: {1})")]
    AfterCurrent(Period, Period),
}

impl Period {
    pub const EARLIEST: Period = Period {
        year: 2020,
        month: 1,
    };

    pub fn new(year: i32, month: u32) -> Result<Self, PeriodRejection> {
        if !(1..=12).contains(&month) {
            return Err(PeriodRejection::MonthOutOfRange(month));
        }
        Ok(Self { year, month })
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Accepts `year`/`month` only inside `[2020-01, month of today]`.
    pub fn validated(year: i32, month: u32, today: NaiveDate) -> Result<Self, PeriodRejection> {
        let period = Self::new(year, month)?;
        let current = Self::containing(today);
        if period < Self::EARLIEST {
            return Err(PeriodRejection::BeforeEarliest(period));
        }
        if period > current {
            return Err(PeriodRejection::AfterCurrent(period, current));
        }
        Ok(period)
    }

    fn month_index(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    /// Signed number of single-month steps from `self` to `target`.
    pub fn months_until(&self, target: &Period) -> i64 {
        target.month_index() - self.month_index()
    }

    #[cfg(test)]
    pub fn previous(&self) -> Period {
        if self.month == 1 {
            Period {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Period {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    #[cfg(test)]
    pub fn next(&self) -> Period {
        if self.month == 12 {
            Period {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Period {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Row class used by the staff list for `day` of this month, e.g. `20250701`.
    pub fn date_tag(&self, day: u32) -> String {
        format!("{:04}{:02}{:02}", self.year, self.month, day)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}年{}月", self.year, self.month)
    }
}

// --- Work Items ---

/// One staff member's timesheet for the selected period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub identity: String,
    /// Where the staff member's detail page lives.
    pub detail_location: String,
}

// --- Units ---

/// The operator's department choice: a 1-based position in the side menu plus
/// the catalog name mapped to that position, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitChoice {
    pub ordinal: usize,
    pub mapped_name: Option<String>,
}

impl UnitChoice {
    pub fn display_name(&self) -> String {
        self.mapped_name
            .clone()
            .unwrap_or_else(|| format!("部署{}", self.ordinal))
    }
}
