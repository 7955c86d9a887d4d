//! Reconstruction of absolute events from raw portal rows.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, warn};

use super::types::{CourseEvent, ExamEvent, RawExamRecord, RawScheduleRecord, RecordSchema};
use crate::error::{Result, ScheduleError};
use crate::institution::InstitutionProfile;
use crate::timetable::{resolve, Season};

/// Inputs shared by every record of one pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub profile: &'a InstitutionProfile,
    /// First day of week 1 of the term
    pub anchor: Option<NaiveDate>,
    /// Term code used for rows that do not carry their own
    pub term_code: Option<&'a str>,
}

/// Result of normalizing a batch of course rows.
#[derive(Debug, Clone, Default)]
pub struct NormalizedCourses {
    pub events: Vec<CourseEvent>,
    /// Rows dropped because they could not be decoded
    pub skipped: usize,
}

/// Result of normalizing a batch of exam rows.
#[derive(Debug, Clone, Default)]
pub struct NormalizedExams {
    pub events: Vec<ExamEvent>,
    pub skipped: usize,
}

impl<'a> NormalizeContext<'a> {
    pub fn new(
        profile: &'a InstitutionProfile,
        anchor: Option<NaiveDate>,
        term_code: Option<&'a str>,
    ) -> Self {
        Self {
            profile,
            anchor,
            term_code,
        }
    }

    fn anchor(&self) -> Result<NaiveDate> {
        self.anchor.ok_or_else(|| ScheduleError::MissingTermAnchor {
            institution: self.profile.key.to_string(),
        })
    }

    /// Expands one raw course row into one event per attended week.
    ///
    /// # Errors
    /// * [`ScheduleError::MissingTermAnchor`] if the context has no anchor
    /// * [`ScheduleError::MissingDayOfWeek`] / [`ScheduleError::MissingField`]
    ///   for rows lacking required data
    /// * [`ScheduleError::PeriodOutOfRange`] / [`ScheduleError::InvalidPeriodSpan`]
    ///   for periods the institution's table cannot place
    pub fn normalize_course(&self, record: &RawScheduleRecord) -> Result<Vec<CourseEvent>> {
        let anchor = self.anchor()?;
        let schema = &self.profile.schema;
        let label = || record.describe(schema);
        let missing = |field: &'static str| ScheduleError::MissingField {
            record: label(),
            field,
        };

        let day_of_week = record
            .number(schema.day_of_week)
            .ok_or_else(|| ScheduleError::MissingDayOfWeek { record: label() })?;
        let lesson_id = record.text(schema.lesson_id).ok_or_else(|| missing("lesson id"))?;
        let weeks = record
            .weeks(schema.weeks, schema.week_shape)
            .ok_or_else(|| missing("week attendance"))?
            .decode();

        let (clock_start, clock_end) = match portal_clock(record, schema) {
            Some(span) => span,
            None => {
                let start_period = record
                    .number(schema.start_period)
                    .ok_or_else(|| missing("start period"))?;
                let end_period = record
                    .number(schema.end_period)
                    .unwrap_or(start_period);
                let season = self.season_of(record).ok_or_else(|| missing("term code"))?;
                self.profile
                    .periods
                    .span(start_period, end_period, season)?
            }
        };

        let fallbacks = &self.profile.fallbacks;
        let course_name = record
            .text(schema.course_name)
            .unwrap_or_else(|| fallbacks.course.to_string());
        let instructor_name = record
            .text(schema.instructor)
            .unwrap_or_else(|| fallbacks.instructor.to_string());
        let room = record.text(schema.room);
        let has_room = room.is_some();
        let location = room.unwrap_or_else(|| fallbacks.location.to_string());

        weeks
            .into_iter()
            .map(|week| {
                let date = resolve(self.profile.key, Some(anchor), week, day_of_week)?;
                Ok(CourseEvent {
                    lesson_id: lesson_id.clone(),
                    course_name: course_name.clone(),
                    instructor_name: instructor_name.clone(),
                    location: location.clone(),
                    has_room,
                    week,
                    start: date.and_time(clock_start),
                    end: date.and_time(clock_end),
                })
            })
            .collect()
    }

    /// Normalizes a batch of course rows, skipping rows that cannot be decoded.
    ///
    /// # Errors
    /// Only [`ScheduleError::MissingTermAnchor`]: without an anchor no row can
    /// be dated, so a non-empty batch is abandoned. An empty batch needs no
    /// anchor.
    pub fn normalize_courses(&self, records: &[RawScheduleRecord]) -> Result<NormalizedCourses> {
        let mut normalized = NormalizedCourses::default();
        if records.is_empty() {
            return Ok(normalized);
        }
        self.anchor()?;

        for record in records {
            match self.normalize_course(record) {
                Ok(events) => normalized.events.extend(events),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        institution = self.profile.key,
                        record = %record.describe(&self.profile.schema),
                        error = %e,
                        "Skipping course record"
                    );
                    normalized.skipped += 1;
                }
            }
        }

        debug!(
            institution = self.profile.key,
            records = records.len(),
            events = normalized.events.len(),
            skipped = normalized.skipped,
            "Normalized course records"
        );
        Ok(normalized)
    }

    /// Normalizes a batch of exam rows, dropping rows whose time text is malformed.
    pub fn normalize_exams(&self, records: &[RawExamRecord]) -> NormalizedExams {
        let mut normalized = NormalizedExams::default();
        for record in records {
            match normalize_exam(record, self.profile) {
                Ok(event) => normalized.events.push(event),
                Err(e) => {
                    warn!(
                        institution = self.profile.key,
                        course = %record.course_name,
                        error = %e,
                        "Skipping exam record"
                    );
                    normalized.skipped += 1;
                }
            }
        }
        normalized
    }

    fn season_of(&self, record: &RawScheduleRecord) -> Option<Season> {
        let term = record
            .text(self.profile.schema.term_code)
            .or_else(|| self.term_code.map(str::to_string))?;
        self.profile.season_rule.season_for(&term)
    }
}

/// Clock span taken from the row itself, when the portal sends one.
fn portal_clock(
    record: &RawScheduleRecord,
    schema: &RecordSchema,
) -> Option<(NaiveTime, NaiveTime)> {
    if schema.clock_start.is_empty() {
        return None;
    }
    let start = record.clock(schema.clock_start)?;
    let end = record.clock(schema.clock_end)?;
    (start < end).then_some((start, end))
}

/// Converts one exam row into an [`ExamEvent`].
///
/// The display text stays `raw_time_text`; the parsed text is
/// `canonical_time_text` when the adapter set one.
///
/// # Errors
/// [`ScheduleError::MalformedTimeText`] unless the parsed text is exactly
/// `{YYYY-MM-DD} {HH:MM}~{HH:MM}` with the end after the start.
pub fn normalize_exam(raw: &RawExamRecord, profile: &InstitutionProfile) -> Result<ExamEvent> {
    let time_text = raw
        .canonical_time_text
        .as_deref()
        .unwrap_or(&raw.raw_time_text);
    let (start, end) = parse_exam_time(time_text)?;

    let location = raw
        .room
        .as_deref()
        .map(str::trim)
        .filter(|room| !room.is_empty())
        .map(str::to_string);
    let seat_number = raw
        .seat_number
        .as_deref()
        .map(str::trim)
        .filter(|seat| !seat.is_empty())
        .unwrap_or(profile.fallbacks.seat)
        .to_string();

    Ok(ExamEvent {
        course_name: raw.course_name.trim().to_string(),
        location,
        seat_number,
        raw_time_text: raw.raw_time_text.trim().to_string(),
        start,
        end,
    })
}

/// Splits `"2024-05-22 10:30~12:30"` into start and end timestamps.
pub fn parse_exam_time(text: &str) -> Result<(NaiveDateTime, NaiveDateTime)> {
    let malformed = || ScheduleError::MalformedTimeText {
        text: text.to_string(),
    };

    let parts: Vec<&str> = text.trim().split(' ').collect();
    let [date, range] = parts.as_slice() else {
        return Err(malformed());
    };
    let times: Vec<&str> = range.split('~').collect();
    let [start, end] = times.as_slice() else {
        return Err(malformed());
    };

    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| malformed())?;
    let start = NaiveTime::parse_from_str(start, "%H:%M").map_err(|_| malformed())?;
    let end = NaiveTime::parse_from_str(end, "%H:%M").map_err(|_| malformed())?;

    if start >= end {
        return Err(malformed());
    }
    Ok((date.and_time(start), date.and_time(end)))
}
