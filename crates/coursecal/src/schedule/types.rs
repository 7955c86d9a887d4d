/// Raw and canonical schedule types
use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::timetable::WeekAttendance;

/// Ordered candidate field names for each logical field of a raw course row.
///
/// Portals rename fields between versions and endpoints; the first candidate
/// present in a row wins.
#[derive(Debug, Clone, Copy)]
pub struct RecordSchema {
    pub lesson_id: &'static [&'static str],
    pub term_code: &'static [&'static str],
    pub weeks: &'static [&'static str],
    pub week_shape: WeekShape,
    pub day_of_week: &'static [&'static str],
    pub start_period: &'static [&'static str],
    pub end_period: &'static [&'static str],
    pub course_name: &'static [&'static str],
    pub instructor: &'static [&'static str],
    pub room: &'static [&'static str],
    /// Portal-provided clock times as `HHMM` integers; when both are present
    /// they take precedence over the period table
    pub clock_start: &'static [&'static str],
    pub clock_end: &'static [&'static str],
}

/// How a portal encodes the week field of a course row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekShape {
    /// One `0`/`1` character per week of the term
    Bitstring,
    /// The week number of a single occurrence
    Index,
}

/// Keys tried, in order, when a room is delivered as an object.
const ROOM_OBJECT_KEYS: &[&str] = &["nameZh", "name", "nameEn"];

/// One course row exactly as the portal delivered it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawScheduleRecord(Map<String, Value>);

impl RawScheduleRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wraps a JSON value, returning `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    /// Returns the value of the first candidate field that is present and not empty.
    pub fn lookup(&self, candidates: &[&str]) -> Option<&Value> {
        candidates
            .iter()
            .filter_map(|name| self.0.get(*name))
            .find(|value| match value {
                Value::Null => false,
                Value::String(s) => !s.trim().is_empty(),
                _ => true,
            })
    }

    /// Resolves a display string. Numbers are rendered, room objects are unwrapped.
    pub fn text(&self, candidates: &[&str]) -> Option<String> {
        match self.lookup(candidates)? {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Object(inner) => ROOM_OBJECT_KEYS
                .iter()
                .filter_map(|key| inner.get(*key).and_then(Value::as_str))
                .map(str::trim)
                .find(|s| !s.is_empty())
                .map(str::to_string),
            _ => None,
        }
    }

    /// Resolves a non-negative integer, accepting numeric strings.
    pub fn number(&self, candidates: &[&str]) -> Option<u32> {
        match self.lookup(candidates)? {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Resolves the week-attendance encoding.
    ///
    /// Strings are read according to `shape`: `"10"` is weeks 1 and 3 of a
    /// bitstring field but week 10 of an index field. Arrays are explicit week
    /// lists and integers are single weeks in either shape.
    pub fn weeks(&self, candidates: &[&str], shape: WeekShape) -> Option<WeekAttendance> {
        match self.lookup(candidates)? {
            Value::String(s) => {
                let s = s.trim();
                match shape {
                    WeekShape::Bitstring => s
                        .chars()
                        .all(|c| c == '0' || c == '1')
                        .then(|| WeekAttendance::Bitstring(s.to_string())),
                    WeekShape::Index => {
                        s.parse().ok().map(|week| WeekAttendance::Weeks(vec![week]))
                    }
                }
            }
            Value::Array(items) => Some(WeekAttendance::Weeks(
                items
                    .iter()
                    .filter_map(Value::as_u64)
                    .filter_map(|n| u32::try_from(n).ok())
                    .collect(),
            )),
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(|week| WeekAttendance::Weeks(vec![week])),
            _ => None,
        }
    }

    /// Resolves an `HHMM` clock time such as `800` or `"1435"`.
    pub fn clock(&self, candidates: &[&str]) -> Option<NaiveTime> {
        let hhmm = self.number(candidates)?;
        NaiveTime::from_hms_opt(hhmm / 100, hhmm % 100, 0)
    }

    /// Short label used in diagnostics.
    pub fn describe(&self, schema: &RecordSchema) -> String {
        self.text(schema.lesson_id)
            .or_else(|| self.text(schema.course_name))
            .unwrap_or_else(|| "<unnamed record>".to_string())
    }

    /// Adds or replaces a field. Adapters use this to attach data joined from
    /// a second payload (for example a course name looked up by lesson id).
    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }
}

/// One exam row as scraped from the portal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawExamRecord {
    pub course_name: String,
    /// Institution-specific free text, e.g. `"2024-05-22 10:30~12:30"`
    pub raw_time_text: String,
    /// `raw_time_text` rewritten as `{YYYY-MM-DD} {HH:MM}~{HH:MM}` by adapters
    /// whose portal uses another layout; parsed in its place when set
    pub canonical_time_text: Option<String>,
    pub room: Option<String>,
    pub seat_number: Option<String>,
}

/// Concatenates two immutable fetch results, keeping source order.
pub fn merge_records<T>(primary: Vec<T>, supplementary: Vec<T>) -> Vec<T> {
    let mut merged = primary;
    merged.extend(supplementary);
    merged
}

/// One occurrence of a course in the timetable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseEvent {
    /// Identifies the course offering; shared by all weekly occurrences
    pub lesson_id: String,
    pub course_name: String,
    pub instructor_name: String,
    pub location: String,
    /// Whether `location` came from the portal rather than the fallback text
    pub has_room: bool,
    pub week: u32,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// One scheduled exam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamEvent {
    pub course_name: String,
    pub location: Option<String>,
    pub seat_number: String,
    pub raw_time_text: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Common view of course and exam events used by calendar filters.
pub trait CalendarEntry {
    fn title(&self) -> &str;
    fn start(&self) -> NaiveDateTime;
    fn end(&self) -> NaiveDateTime;
    fn has_known_location(&self) -> bool;
}

impl CalendarEntry for CourseEvent {
    fn title(&self) -> &str {
        &self.course_name
    }

    fn start(&self) -> NaiveDateTime {
        self.start
    }

    fn end(&self) -> NaiveDateTime {
        self.end
    }

    fn has_known_location(&self) -> bool {
        self.has_room
    }
}

impl CalendarEntry for ExamEvent {
    fn title(&self) -> &str {
        &self.course_name
    }

    fn start(&self) -> NaiveDateTime {
        self.start
    }

    fn end(&self) -> NaiveDateTime {
        self.end
    }

    fn has_known_location(&self) -> bool {
        self.location.is_some()
    }
}
