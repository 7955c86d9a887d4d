//! Calendar synthesis.
//!
//! Turns canonical course and exam events into an iCalendar document with one
//! VEVENT per event and one display reminder per VEVENT. Exams are written
//! before courses and source order is kept within each group; calendar
//! clients sort by date themselves.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use ical::generator::{
    Emitter, IcalCalendar, IcalCalendarBuilder, IcalEvent, IcalEventBuilder, ICAL_DATE_FORMAT,
};
use ical::ical_property;
use ical::parser::ical::component::IcalAlarm;
use ical::property::Property;
use sha2::{Digest, Sha256};

use crate::schedule::{CalendarEntry, CourseEvent, ExamEvent};

const PRODID: &str = "-//coursecal//timetable feed//ZH";

/// Reminder fired before an exam starts.
pub const EXAM_REMINDER: Reminder = Reminder { minutes_before: 30 };
/// Reminder fired before a class starts.
pub const COURSE_REMINDER: Reminder = Reminder { minutes_before: 15 };

/// A VALARM relative to the start of its event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reminder {
    pub minutes_before: i64,
}

impl Reminder {
    /// The TRIGGER value, e.g. `-PT30M`.
    pub fn trigger(&self) -> String {
        format!("-PT{}M", self.minutes_before)
    }

    /// Absolute time at which the reminder fires for an event starting at `start`.
    pub fn fires_at(&self, start: NaiveDateTime) -> NaiveDateTime {
        start - Duration::minutes(self.minutes_before)
    }

    fn to_alarm(self, description: &str) -> IcalAlarm {
        let mut alarm = IcalAlarm::new();
        alarm.properties.push(ical_property!("ACTION", "DISPLAY"));
        alarm
            .properties
            .push(ical_property!("DESCRIPTION", escape_text(description)));
        alarm.properties.push(ical_property!("TRIGGER", self.trigger()));
        alarm
    }
}

/// Calendar-level properties.
#[derive(Debug, Clone)]
pub struct CalendarOptions {
    /// X-WR-CALNAME
    pub name: String,
    /// X-APPLE-CALENDAR-COLOR
    pub color: String,
    /// IANA zone of the event times, written as TZID and X-WR-TIMEZONE
    pub timezone: String,
    /// Written as DTSTAMP on every event
    pub generated_at: DateTime<Utc>,
}

impl CalendarOptions {
    pub fn new(generated_at: DateTime<Utc>) -> Self {
        Self {
            name: "课程表".to_string(),
            color: "#540EB9".to_string(),
            timezone: "Asia/Shanghai".to_string(),
            generated_at,
        }
    }

    fn dtstamp(&self) -> String {
        format!("{}Z", self.generated_at.format(ICAL_DATE_FORMAT))
    }
}

/// Predicate deciding whether an event is written to the calendar.
pub type EventFilter<'a> = &'a dyn Fn(&dyn CalendarEntry) -> bool;

/// A serialized calendar plus what went into it.
#[derive(Debug, Clone)]
pub struct CalendarDocument {
    pub bytes: Vec<u8>,
    pub exam_entries: usize,
    pub course_entries: usize,
}

impl CalendarDocument {
    pub fn entries(&self) -> usize {
        self.exam_entries + self.course_entries
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Serializes `exams` and `courses` into an iCalendar document.
///
/// When `filter` is given it is applied to each group independently and only
/// events for which it returns true are written.
pub fn synthesize(
    courses: &[CourseEvent],
    exams: &[ExamEvent],
    options: &CalendarOptions,
    filter: Option<EventFilter<'_>>,
) -> CalendarDocument {
    let mut calendar: IcalCalendar = IcalCalendarBuilder::version("2.0")
        .gregorian()
        .prodid(PRODID)
        .set(ical_property!("X-WR-CALNAME", escape_text(&options.name)))
        .set(ical_property!("X-APPLE-CALENDAR-COLOR", options.color.as_str()))
        .set(ical_property!("X-WR-TIMEZONE", options.timezone.as_str()))
        .build();

    let mut exam_entries = 0;
    for exam in exams.iter().filter(|e| included(filter, *e)) {
        calendar.events.push(exam_event(exam, options));
        exam_entries += 1;
    }

    let mut course_entries = 0;
    for course in courses.iter().filter(|c| included(filter, *c)) {
        calendar.events.push(course_event(course, options));
        course_entries += 1;
    }

    CalendarDocument {
        bytes: calendar.generate().into_bytes(),
        exam_entries,
        course_entries,
    }
}

fn included(filter: Option<EventFilter<'_>>, entry: &dyn CalendarEntry) -> bool {
    filter.map_or(true, |f| f(entry))
}

/// Deterministic UID: the same key and start always yield the same identifier.
pub fn stable_uid(kind: &str, key: &str, start: NaiveDateTime) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    hasher.update([0u8]);
    hasher.update(start.format(ICAL_DATE_FORMAT).to_string().as_bytes());
    let digest = hasher.finalize();
    format!("{kind}-{}@coursecal", hex::encode(&digest[..16]))
}

/// Escapes backslash, semicolon, comma and newlines in a TEXT value.
///
/// The emitter writes property values verbatim, so TEXT values pass through here.
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}

/// Text written as the LOCATION of an exam.
pub fn exam_location(exam: &ExamEvent) -> String {
    match &exam.location {
        Some(room) => format!("教室: {room} 座位号: {}", exam.seat_number),
        None => "考试地点: 请查看教务系统".to_string(),
    }
}

fn exam_event(exam: &ExamEvent, options: &CalendarOptions) -> IcalEvent {
    let summary = format!("{}考试", exam.course_name);
    let description = format!("考试时间: {}", exam.raw_time_text);
    let mut event = IcalEventBuilder::tzid(options.timezone.as_str())
        .uid(stable_uid("exam", &exam.course_name, exam.start))
        .changed_utc(options.dtstamp())
        .start(exam.start.format(ICAL_DATE_FORMAT).to_string())
        .end(exam.end.format(ICAL_DATE_FORMAT).to_string())
        .set(ical_property!("SUMMARY", escape_text(&summary)))
        .set(ical_property!("DESCRIPTION", escape_text(&description)))
        .set(ical_property!("LOCATION", escape_text(&exam_location(exam))))
        .build();
    event
        .alarms
        .push(EXAM_REMINDER.to_alarm(&format!("{}考试即将开始！", exam.course_name)));
    event
}

fn course_event(course: &CourseEvent, options: &CalendarOptions) -> IcalEvent {
    let mut event = IcalEventBuilder::tzid(options.timezone.as_str())
        .uid(stable_uid("course", &course.lesson_id, course.start))
        .changed_utc(options.dtstamp())
        .start(course.start.format(ICAL_DATE_FORMAT).to_string())
        .end(course.end.format(ICAL_DATE_FORMAT).to_string())
        .set(ical_property!("SUMMARY", escape_text(&course.course_name)))
        .set(ical_property!("DESCRIPTION", escape_text(&course.instructor_name)))
        .set(ical_property!("LOCATION", escape_text(&course.location)))
        .build();
    event.alarms.push(COURSE_REMINDER.to_alarm(&format!(
        "{}课程在{}即将开始！",
        course.course_name, course.location
    )));
    event
}

/// Ready-made filters.
pub mod filters {
    use chrono::NaiveDateTime;

    use crate::schedule::CalendarEntry;

    /// Keeps events starting strictly after `now`.
    pub fn starts_after(now: NaiveDateTime) -> impl Fn(&dyn CalendarEntry) -> bool {
        move |entry: &dyn CalendarEntry| entry.start() > now
    }

    /// Keeps events whose location came from the portal.
    pub fn has_known_location() -> impl Fn(&dyn CalendarEntry) -> bool {
        |entry: &dyn CalendarEntry| entry.has_known_location()
    }
}

/// Hex encoding helper.
mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
