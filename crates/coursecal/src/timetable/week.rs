//! Academic week arithmetic.

use chrono::{Duration, NaiveDate};

use crate::error::{Result, ScheduleError};

/// Character that marks an attended week in a bitstring encoding.
pub const ATTEND_MARKER: char = '1';

/// Compact representation of the weeks of a term in which a course meets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeekAttendance {
    /// Position `i` (0-based) set to [`ATTEND_MARKER`] means week `i + 1`
    Bitstring(String),
    /// Explicit week numbers, in any order
    Weeks(Vec<u32>),
}

impl WeekAttendance {
    /// Decodes the encoding into ascending, distinct week numbers.
    pub fn decode(&self) -> Vec<u32> {
        match self {
            WeekAttendance::Bitstring(bits) => bits
                .chars()
                .enumerate()
                .filter(|(_, c)| *c == ATTEND_MARKER)
                .map(|(i, _)| i as u32 + 1)
                .collect(),
            WeekAttendance::Weeks(weeks) => {
                let mut weeks = weeks.clone();
                weeks.sort_unstable();
                weeks.dedup();
                weeks
            }
        }
    }
}

/// Computes the date of `day_of_week` (1 = Monday .. 7 = Sunday) in academic
/// week `week` (1-based) of `institution`'s term starting on `anchor`.
///
/// # Errors
/// * [`ScheduleError::MissingTermAnchor`] naming `institution` if `anchor` is `None`
/// * [`ScheduleError::InvalidWeek`] / [`ScheduleError::InvalidWeekday`] for
///   out-of-range inputs
pub fn resolve(
    institution: &str,
    anchor: Option<NaiveDate>,
    week: u32,
    day_of_week: u32,
) -> Result<NaiveDate> {
    let anchor = anchor.ok_or_else(|| ScheduleError::MissingTermAnchor {
        institution: institution.to_string(),
    })?;
    resolve_from(anchor, week, day_of_week)
}

/// Like [`resolve`] for callers that already hold an anchor.
pub fn resolve_from(anchor: NaiveDate, week: u32, day_of_week: u32) -> Result<NaiveDate> {
    if week == 0 {
        return Err(ScheduleError::InvalidWeek { week });
    }
    if !(1..=7).contains(&day_of_week) {
        return Err(ScheduleError::InvalidWeekday { day: day_of_week });
    }

    let offset = i64::from(week - 1) * 7 + i64::from(day_of_week - 1);
    anchor
        .checked_add_signed(Duration::days(offset))
        .ok_or(ScheduleError::InvalidWeek { week })
}

/// Recovers the term anchor from one dated occurrence, the inverse of [`resolve_from`].
pub fn anchor_from_occurrence(date: NaiveDate, week: u32, day_of_week: u32) -> Result<NaiveDate> {
    if week == 0 {
        return Err(ScheduleError::InvalidWeek { week });
    }
    if !(1..=7).contains(&day_of_week) {
        return Err(ScheduleError::InvalidWeekday { day: day_of_week });
    }

    let offset = i64::from(week - 1) * 7 + i64::from(day_of_week - 1);
    date.checked_sub_signed(Duration::days(offset))
        .ok_or(ScheduleError::InvalidWeek { week })
}
