//! Period-to-clock-time tables.
//!
//! Every institution divides its teaching day into numbered periods. The clock
//! times of those periods shift between a winter and a summer timetable (lunch
//! breaks and afternoon starts move), so each institution carries two tables.

use std::fmt;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};

/// Which of an institution's two period tables applies to a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Summer,
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Season::Winter => write!(f, "winter"),
            Season::Summer => write!(f, "summer"),
        }
    }
}

/// How an institution maps the trailing digit of a term code onto a season.
///
/// This is a convention of each portal and is never inferred from the
/// calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonRule {
    /// Odd trailing digit selects the winter table, even selects summer
    OddIsWinter,
    /// Odd trailing digit selects the summer table, even selects winter
    OddIsSummer,
}

impl SeasonRule {
    /// Derives the season from a term code such as `"2023-2024-1"` or `"221"`.
    ///
    /// Returns `None` if the code does not end in an ASCII digit.
    pub fn season_for(&self, term_code: &str) -> Option<Season> {
        let digit = term_code.trim().chars().last()?.to_digit(10)?;
        let odd = digit % 2 == 1;
        Some(match (self, odd) {
            (SeasonRule::OddIsWinter, true) | (SeasonRule::OddIsSummer, false) => Season::Winter,
            (SeasonRule::OddIsWinter, false) | (SeasonRule::OddIsSummer, true) => Season::Summer,
        })
    }
}

/// One teaching period: `(start_hour, start_minute, end_hour, end_minute)`.
pub type Slot = (u32, u32, u32, u32);

/// Fixed mapping from 1-based period index to wall-clock start and end times.
#[derive(Debug, Clone, Copy)]
pub struct PeriodTable {
    winter: &'static [Slot],
    summer: &'static [Slot],
}

impl PeriodTable {
    pub const fn new(winter: &'static [Slot], summer: &'static [Slot]) -> Self {
        Self { winter, summer }
    }

    fn slots(&self, season: Season) -> &'static [Slot] {
        match season {
            Season::Winter => self.winter,
            Season::Summer => self.summer,
        }
    }

    /// Number of periods in the table for `season`.
    pub fn len(&self, season: Season) -> usize {
        self.slots(season).len()
    }

    /// Looks up the clock start and end of `period` in the `season` table.
    ///
    /// # Errors
    /// [`ScheduleError::PeriodOutOfRange`] when the table has no such period.
    pub fn lookup(&self, period: u32, season: Season) -> Result<(NaiveTime, NaiveTime)> {
        let slots = self.slots(season);
        let out_of_range = || ScheduleError::PeriodOutOfRange {
            period,
            season,
            available: slots.len(),
        };

        let index = (period as usize).checked_sub(1).ok_or_else(out_of_range)?;
        let &(sh, sm, eh, em) = slots.get(index).ok_or_else(out_of_range)?;

        let start = NaiveTime::from_hms_opt(sh, sm, 0).ok_or_else(out_of_range)?;
        let end = NaiveTime::from_hms_opt(eh, em, 0).ok_or_else(out_of_range)?;
        Ok((start, end))
    }

    /// Clock span covered by periods `start..=end`: start of the first, end of the last.
    pub fn span(&self, start: u32, end: u32, season: Season) -> Result<(NaiveTime, NaiveTime)> {
        let (clock_start, _) = self.lookup(start, season)?;
        let (_, clock_end) = self.lookup(end, season)?;

        if clock_start >= clock_end {
            return Err(ScheduleError::InvalidPeriodSpan { start, end });
        }
        Ok((clock_start, clock_end))
    }
}
