//! One full fetch-and-rebuild run.
//!
//! 1. Authenticate (rejection is fatal)
//! 2. Fetch course rows and exam rows (failures degrade to empty)
//! 3. Fetch the term anchor when there are course rows to date (absence is fatal)
//! 4. Normalize both
//! 5. Synthesize the calendar

use rand::Rng;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::calendar::{synthesize, CalendarDocument, CalendarOptions, EventFilter};
use crate::error::{Result, ScheduleError};
use crate::institution::InstitutionAdapter;
use crate::schedule::NormalizeContext;

/// Counts describing one run, logged and reported to HTTP clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub institution: String,
    pub course_records: usize,
    pub exam_records: usize,
    pub course_events: usize,
    pub exam_events: usize,
    pub skipped_courses: usize,
    pub skipped_exams: usize,
    /// Events written after filtering
    pub written: usize,
}

impl BuildReport {
    pub fn skipped(&self) -> usize {
        self.skipped_courses + self.skipped_exams
    }
}

#[derive(Debug)]
pub struct CalendarBuild {
    pub document: CalendarDocument,
    pub report: BuildReport,
}

/// Runs the pipeline against `adapter`.
///
/// # Errors
/// * [`ScheduleError::AuthenticationFailure`] if the portal rejects the login
/// * [`ScheduleError::MissingTermAnchor`] if course rows were fetched but no
///   anchor date can be obtained
/// * Any error raised while authenticating (network, unexpected response)
pub fn build_calendar(
    adapter: &mut dyn InstitutionAdapter,
    options: &CalendarOptions,
    filter: Option<EventFilter<'_>>,
) -> Result<CalendarBuild> {
    let profile = adapter.profile();
    let correlation_id = generate_correlation_id();
    info!(
        correlation_id = %correlation_id,
        institution = profile.key,
        "Starting calendar build"
    );

    if !adapter.authenticate()? {
        return Err(ScheduleError::AuthenticationFailure {
            institution: profile.key.to_string(),
        });
    }

    let courses = adapter.fetch_raw_course_records().unwrap_or_else(|e| {
        error!(correlation_id = %correlation_id, error = %e, "Failed to fetch course records");
        Vec::new()
    });
    let exams = adapter.fetch_raw_exam_records().unwrap_or_else(|e| {
        error!(correlation_id = %correlation_id, error = %e, "Failed to fetch exam records");
        Vec::new()
    });

    // an exam-only term has nothing to date against week 1
    let anchor = if courses.is_empty() {
        debug!(correlation_id = %correlation_id, "No course records, term anchor not needed");
        None
    } else {
        match adapter.fetch_term_anchor_date() {
            Ok(Some(anchor)) => {
                debug!(correlation_id = %correlation_id, anchor = %anchor, "Term anchor resolved");
                Some(anchor)
            }
            Ok(None) => {
                error!(correlation_id = %correlation_id, "Portal did not provide a term anchor");
                return Err(ScheduleError::MissingTermAnchor {
                    institution: profile.key.to_string(),
                });
            }
            Err(e) => {
                error!(correlation_id = %correlation_id, error = %e, "Failed to fetch term anchor");
                return Err(ScheduleError::MissingTermAnchor {
                    institution: profile.key.to_string(),
                });
            }
        }
    };

    let context = NormalizeContext::new(profile, anchor, adapter.current_term_code());
    let normalized_courses = context.normalize_courses(&courses)?;
    let normalized_exams = context.normalize_exams(&exams);

    let document = synthesize(
        &normalized_courses.events,
        &normalized_exams.events,
        options,
        filter,
    );

    let report = BuildReport {
        institution: profile.key.to_string(),
        course_records: courses.len(),
        exam_records: exams.len(),
        course_events: normalized_courses.events.len(),
        exam_events: normalized_exams.events.len(),
        skipped_courses: normalized_courses.skipped,
        skipped_exams: normalized_exams.skipped,
        written: document.entries(),
    };
    info!(
        correlation_id = %correlation_id,
        institution = profile.key,
        events = report.written,
        skipped = report.skipped(),
        "Calendar build finished"
    );

    Ok(CalendarBuild { document, report })
}

/// Generates a short ID for tying together the log lines of one run.
fn generate_correlation_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    let random: u32 = rand::thread_rng().gen();
    format!("{:x}-{:08x}", timestamp & 0xFFFFFFFF, random)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::filters;
    use crate::institution::nwafu::PROFILE as NWAFU;
    use crate::institution::InstitutionProfile;
    use crate::schedule::{RawExamRecord, RawScheduleRecord};
    use chrono::{Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
    use ical::generator::ICAL_DATE_FORMAT;
    use ical::parser::ical::component::IcalEvent;
    use serde_json::json;

    #[derive(Default)]
    struct StubAdapter {
        accept: bool,
        anchor: Option<NaiveDate>,
        courses: Vec<RawScheduleRecord>,
        exams: Vec<RawExamRecord>,
        fail_courses: bool,
        authenticated: bool,
    }

    impl InstitutionAdapter for StubAdapter {
        fn profile(&self) -> &'static InstitutionProfile {
            &NWAFU
        }

        fn authenticate(&mut self) -> Result<bool> {
            self.authenticated = self.accept;
            Ok(self.accept)
        }

        fn fetch_term_anchor_date(&mut self) -> Result<Option<NaiveDate>> {
            assert!(self.authenticated, "anchor fetched before login");
            Ok(self.anchor)
        }

        fn fetch_raw_course_records(&mut self) -> Result<Vec<RawScheduleRecord>> {
            if self.fail_courses {
                return Err(ScheduleError::Network {
                    message: "connection reset".to_string(),
                });
            }
            Ok(self.courses.clone())
        }

        fn fetch_raw_exam_records(&mut self) -> Result<Vec<RawExamRecord>> {
            Ok(self.exams.clone())
        }
    }

    fn stub() -> StubAdapter {
        let course = RawScheduleRecord::from_value(json!({
            "JXBID": "T1",
            "KCM": "编译原理",
            "SKJS": "王老师",
            "JASMC": "教一-201",
            "SKZC": "1100",
            "SKXQ": 1,
            "KSJC": 1,
            "JSJC": 2,
            "XNXQDM": "2023-2024-1"
        }))
        .unwrap();
        let exam = RawExamRecord {
            course_name: "编译原理".to_string(),
            raw_time_text: "2024-05-22 10:30~12:30".to_string(),
            room: Some("草堂8-106".to_string()),
            ..Default::default()
        };
        StubAdapter {
            accept: true,
            anchor: NaiveDate::from_ymd_opt(2024, 2, 26),
            courses: vec![course],
            exams: vec![exam],
            ..Default::default()
        }
    }

    fn options() -> CalendarOptions {
        CalendarOptions::new(Utc.with_ymd_and_hms(2024, 2, 20, 0, 0, 0).unwrap())
    }

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn value<'a>(properties: &'a [ical::property::Property], name: &str) -> &'a str {
        properties
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.value.as_deref())
            .unwrap()
    }

    /// Absolute time an event's only alarm fires, read from the document.
    fn alarm_fires_at(event: &IcalEvent) -> NaiveDateTime {
        let start =
            NaiveDateTime::parse_from_str(value(&event.properties, "DTSTART"), ICAL_DATE_FORMAT)
                .unwrap();
        let trigger = value(&event.alarms[0].properties, "TRIGGER");
        let minutes: i64 = trigger
            .strip_prefix("-PT")
            .and_then(|t| t.strip_suffix('M'))
            .unwrap()
            .parse()
            .unwrap();
        start - Duration::minutes(minutes)
    }

    #[test]
    fn test_end_to_end_build() {
        let mut adapter = stub();
        let build = build_calendar(&mut adapter, &options(), None).unwrap();

        assert_eq!(build.document.entries(), 3);
        assert_eq!(build.document.exam_entries, 1);
        assert_eq!(build.document.course_entries, 2);
        assert_eq!(build.report.course_events, 2);
        assert_eq!(build.report.exam_events, 1);
        assert_eq!(build.report.skipped(), 0);

        let bytes = build.document.into_bytes();
        let calendar = ical::IcalParser::new(bytes.as_slice())
            .next()
            .unwrap()
            .unwrap();
        let events = calendar.events;
        assert_eq!(events.len(), 3);

        let uids: Vec<&str> = events.iter().map(|e| value(&e.properties, "UID")).collect();
        assert!(uids.iter().all(|uid| uids.iter().filter(|u| *u == uid).count() == 1));

        // exams precede courses
        let summaries: Vec<&str> = events
            .iter()
            .map(|e| value(&e.properties, "SUMMARY"))
            .collect();
        assert_eq!(summaries, vec!["编译原理考试", "编译原理", "编译原理"]);

        let starts: Vec<&str> = events
            .iter()
            .map(|e| value(&e.properties, "DTSTART"))
            .collect();
        assert_eq!(starts, vec!["20240522T103000", "20240226T080000", "20240304T080000"]);

        let exam = &events[0];
        assert_eq!(value(&exam.alarms[0].properties, "TRIGGER"), "-PT30M");
        assert_eq!(alarm_fires_at(exam), dt("2024-05-22 10:00"));
        assert_eq!(alarm_fires_at(&events[1]), dt("2024-02-26 07:45"));
    }

    #[test]
    fn test_rejected_login_is_fatal() {
        let mut adapter = StubAdapter {
            accept: false,
            ..stub()
        };
        let err = build_calendar(&mut adapter, &options(), None).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::AuthenticationFailure {
                institution: "nwafu".to_string()
            }
        );
    }

    #[test]
    fn test_missing_anchor_is_fatal() {
        let mut adapter = StubAdapter {
            anchor: None,
            ..stub()
        };
        let err = build_calendar(&mut adapter, &options(), None).unwrap_err();
        assert!(matches!(err, ScheduleError::MissingTermAnchor { .. }));
    }

    #[test]
    fn test_exam_only_term_needs_no_anchor() {
        let mut adapter = StubAdapter {
            anchor: None,
            courses: Vec::new(),
            ..stub()
        };
        let build = build_calendar(&mut adapter, &options(), None).unwrap();
        assert_eq!(build.document.course_entries, 0);
        assert_eq!(build.document.exam_entries, 1);
        assert_eq!(build.report.course_records, 0);
    }

    #[test]
    fn test_course_fetch_failure_still_yields_exams() {
        let mut adapter = StubAdapter {
            fail_courses: true,
            anchor: None,
            ..stub()
        };
        let build = build_calendar(&mut adapter, &options(), None).unwrap();
        assert_eq!(build.document.course_entries, 0);
        assert_eq!(build.document.exam_entries, 1);
    }

    #[test]
    fn test_malformed_rows_are_counted() {
        let mut adapter = stub();
        adapter.exams.push(RawExamRecord {
            course_name: "操作系统".to_string(),
            raw_time_text: "待定".to_string(),
            ..Default::default()
        });
        adapter
            .courses
            .push(RawScheduleRecord::from_value(json!({ "JXBID": "T2", "SKZC": "1" })).unwrap());

        let build = build_calendar(&mut adapter, &options(), None).unwrap();
        assert_eq!(build.report.skipped_exams, 1);
        assert_eq!(build.report.skipped_courses, 1);
        assert_eq!(build.report.skipped(), 2);
        assert_eq!(build.document.entries(), 3);
    }

    #[test]
    fn test_filter_applies_to_both_groups() {
        let mut adapter = stub();
        let upcoming = filters::starts_after(dt("2024-03-01 00:00"));
        let build = build_calendar(&mut adapter, &options(), Some(&upcoming)).unwrap();

        // week 1 course is dropped; week 2 course and the exam remain
        assert_eq!(build.document.course_entries, 1);
        assert_eq!(build.document.exam_entries, 1);
        assert_eq!(build.report.written, 2);
        assert_eq!(build.report.course_events, 2);
    }
}
