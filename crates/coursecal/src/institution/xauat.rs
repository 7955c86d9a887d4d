//! Xi'an University of Architecture and Technology (swjw.xauat.edu.cn).
//!
//! Login is a salted SHA-1 handshake:
//! 1. GET /login-salt returns a per-session salt
//! 2. POST /login with `sha1("{salt}-{password}")`
//!
//! The course table is then fetched in two steps: the lesson ids of the
//! selected semester, and the schedule datum for those ids. Schedule rows are
//! per-occurrence (one row per week), carrying `weekIndex`, `weekday`, the
//! period units and the clock times as `HHMM` integers (`startTime`,
//! `endTime`); course names come from the datum's `lessonList` and are joined
//! onto each row by lesson id. The clock times are authoritative; the period
//! tables below only place rows that lack them.

use std::sync::{Arc, LazyLock};

use chrono::NaiveDate;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::cookie::Jar;
use scraper::{Html, Selector};
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use super::{
    build_client, AdapterSettings, Credentials, FallbackText, InstitutionAdapter,
    InstitutionProfile,
};
use crate::error::{Result, ScheduleError};
use crate::schedule::{RawExamRecord, RawScheduleRecord, RecordSchema, WeekShape};
use crate::timetable::{anchor_from_occurrence, PeriodTable, SeasonRule, Slot};

const BASE_URL: &str = "https://swjw.xauat.edu.cn/student";

/// Field a row's semester name is attached under before normalization.
const TERM_FIELD: &str = "semesterCode";

const WINTER: &[Slot] = &[
    (8, 0, 8, 45),
    (8, 50, 9, 35),
    (10, 5, 10, 50),
    (10, 55, 11, 40),
    (14, 0, 14, 45),
    (14, 50, 15, 35),
    (16, 5, 16, 50),
    (16, 55, 17, 40),
    (19, 0, 19, 45),
    (19, 50, 20, 35),
    (20, 40, 21, 25),
];

const SUMMER: &[Slot] = &[
    (8, 0, 8, 45),
    (8, 50, 9, 35),
    (10, 5, 10, 50),
    (10, 55, 11, 40),
    (14, 30, 15, 15),
    (15, 20, 16, 5),
    (16, 35, 17, 20),
    (17, 25, 18, 10),
    (19, 30, 20, 15),
    (20, 20, 21, 5),
    (21, 10, 21, 55),
];

pub static PROFILE: InstitutionProfile = InstitutionProfile {
    key: "xauat",
    display_name: "西安建筑科技大学",
    timezone: chrono_tz::Asia::Shanghai,
    periods: PeriodTable::new(WINTER, SUMMER),
    // semester names end in -1 (autumn) or -2 (spring)
    season_rule: SeasonRule::OddIsWinter,
    schema: RecordSchema {
        lesson_id: &["lessonId"],
        term_code: &[TERM_FIELD],
        weeks: &["weekIndex", "weeks"],
        week_shape: WeekShape::Index,
        day_of_week: &["weekday", "dayOfWeek"],
        start_period: &["startUnit"],
        end_period: &["endUnit"],
        course_name: &["courseName"],
        instructor: &["personName", "teacherName"],
        room: &["room", "roomZh"],
        clock_start: &["startTime"],
        clock_end: &["endTime"],
    },
    fallbacks: FallbackText {
        course: "未知课程",
        instructor: "未知教师",
        location: "未知地点",
        seat: "未知座位",
    },
};

static SEMESTER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"selected" value="([^"]*)"[^>]*>\s*([^<]*?)\s*<"#).unwrap()
});
static EXAM_ROW_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table#exams tr").unwrap());
static CELL_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());

/// The semester currently selected on the course-table page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Semester {
    /// Opaque id used in API query strings
    pub id: String,
    /// Display name such as `2023-2024-2`; falls back to the id
    pub name: String,
}

pub struct XauatAdapter {
    client: Client,
    credentials: Credentials,
    semester: Option<Semester>,
    rows: Option<Vec<RawScheduleRecord>>,
}

pub fn create(
    credentials: Credentials,
    settings: &AdapterSettings,
) -> Result<Box<dyn InstitutionAdapter>> {
    Ok(Box::new(XauatAdapter::new(credentials, settings)?))
}

impl XauatAdapter {
    pub fn new(credentials: Credentials, settings: &AdapterSettings) -> Result<Self> {
        Ok(Self {
            client: build_client(settings, true, false, Arc::new(Jar::default()))?,
            credentials,
            semester: None,
            rows: None,
        })
    }

    fn fetch_semester(&mut self) -> Result<Semester> {
        if let Some(semester) = &self.semester {
            return Ok(semester.clone());
        }

        let html = self
            .client
            .get(format!("{}/for-std/course-table", BASE_URL))
            .send()?
            .error_for_status()?
            .text()?;
        let semester = parse_semester(&html).ok_or_else(|| ScheduleError::UnexpectedResponse {
            message: "Course table page has no selected semester".to_string(),
        })?;

        debug!(semester_id = %semester.id, semester = %semester.name, "Resolved current semester");
        self.semester = Some(semester.clone());
        Ok(semester)
    }

    /// Schedule rows are needed for both the anchor and the course list, so
    /// they are fetched once per run.
    fn fetch_rows(&mut self) -> Result<Vec<RawScheduleRecord>> {
        if let Some(rows) = &self.rows {
            return Ok(rows.clone());
        }

        let semester = self.fetch_semester()?;
        let ids: Value = self
            .client
            .get(format!(
                "{}/for-std/course-table/get-data?bizTypeId=2&semesterId={}&dataId=",
                BASE_URL, semester.id
            ))
            .send()?
            .error_for_status()?
            .json()?;
        let lesson_ids = ids
            .get("lessonIds")
            .cloned()
            .ok_or_else(|| ScheduleError::UnexpectedResponse {
                message: "Course table data has no lessonIds".to_string(),
            })?;

        let rows = if lesson_ids.as_array().is_some_and(|ids| ids.is_empty()) {
            Vec::new()
        } else {
            let datum: Value = self
                .client
                .post(format!("{}/ws/schedule-table/datum", BASE_URL))
                .json(&json!({ "studentId": "null", "lessonIds": lesson_ids }))
                .send()?
                .error_for_status()?
                .json()?;
            join_schedule_rows(&datum, &semester.name)?
        };

        info!(semester = %semester.name, rows = rows.len(), "Fetched schedule rows");
        self.rows = Some(rows.clone());
        Ok(rows)
    }
}

impl InstitutionAdapter for XauatAdapter {
    fn profile(&self) -> &'static InstitutionProfile {
        &PROFILE
    }

    fn authenticate(&mut self) -> Result<bool> {
        let salt = self
            .client
            .get(format!("{}/login-salt", BASE_URL))
            .send()?
            .error_for_status()?
            .text()?;

        let payload = json!({
            "username": self.credentials.username,
            "password": salted_password(salt.trim(), &self.credentials.password),
            "captcha": "false",
        });
        let response: Value = self
            .client
            .post(format!("{}/login", BASE_URL))
            .json(&payload)
            .send()?
            .json()?;

        let accepted = response.get("result").and_then(Value::as_bool).unwrap_or(false);
        if !accepted {
            warn!(username = %self.credentials.username, "Portal rejected credentials");
        }
        Ok(accepted)
    }

    fn fetch_term_anchor_date(&mut self) -> Result<Option<NaiveDate>> {
        let rows = self.fetch_rows()?;
        Ok(anchor_from_rows(&rows))
    }

    fn fetch_raw_course_records(&mut self) -> Result<Vec<RawScheduleRecord>> {
        self.fetch_rows()
    }

    fn fetch_raw_exam_records(&mut self) -> Result<Vec<RawExamRecord>> {
        let html = self
            .client
            .get(format!("{}/for-std/exam-arrange", BASE_URL))
            .send()?
            .error_for_status()?
            .text()?;
        parse_exam_table(&html)
    }

    fn current_term_code(&self) -> Option<&str> {
        self.semester.as_ref().map(|s| s.name.as_str())
    }
}

/// Hex-encoded `sha1("{salt}-{password}")`.
pub fn salted_password(salt: &str, password: &str) -> String {
    let digest = Sha1::digest(format!("{}-{}", salt, password).as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn parse_semester(html: &str) -> Option<Semester> {
    let captures = SEMESTER_REGEX.captures(html)?;
    let id = captures.get(1)?.as_str().trim().to_string();
    if id.is_empty() {
        return None;
    }
    let name = captures
        .get(2)
        .map(|m| m.as_str().trim())
        .filter(|name| !name.is_empty())
        .unwrap_or(&id)
        .to_string();
    Some(Semester { id, name })
}

/// Joins `lessonList` course names onto `scheduleList` rows and tags each row
/// with the semester name.
pub fn join_schedule_rows(datum: &Value, semester: &str) -> Result<Vec<RawScheduleRecord>> {
    let result = datum.get("result").unwrap_or(datum);
    let lessons = result
        .get("lessonList")
        .and_then(Value::as_array)
        .ok_or_else(|| ScheduleError::ParseError {
            message: "Schedule datum has no lessonList".to_string(),
        })?;
    let schedules = result
        .get("scheduleList")
        .and_then(Value::as_array)
        .ok_or_else(|| ScheduleError::ParseError {
            message: "Schedule datum has no scheduleList".to_string(),
        })?;

    let course_name = |lesson_id: &Value| {
        lessons
            .iter()
            .find(|lesson| lesson.get("id") == Some(lesson_id))
            .and_then(|lesson| lesson.get("courseName"))
            .cloned()
    };

    Ok(schedules
        .iter()
        .cloned()
        .filter_map(RawScheduleRecord::from_value)
        .map(|row| {
            let name = row.lookup(&["lessonId"]).and_then(course_name);
            let row = row.with_field(TERM_FIELD, Value::String(semester.to_string()));
            match name {
                Some(name) => row.with_field("courseName", name),
                None => row,
            }
        })
        .collect())
}

/// Derives week 1's first day from the first row carrying a date, week and weekday.
pub fn anchor_from_rows(rows: &[RawScheduleRecord]) -> Option<NaiveDate> {
    let schema = &PROFILE.schema;
    rows.iter().find_map(|row| {
        let date = row
            .text(&["date"])
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok())?;
        // per-occurrence rows carry a single week index
        let week = row.number(schema.weeks)?;
        let day = row.number(schema.day_of_week)?;
        anchor_from_occurrence(date, week, day).ok()
    })
}

/// Parses the `table#exams` listing: course, time, room, seat.
pub fn parse_exam_table(html: &str) -> Result<Vec<RawExamRecord>> {
    let document = Html::parse_document(html);
    let mut rows = document.select(&EXAM_ROW_SELECTOR).peekable();
    if rows.peek().is_none() {
        return Err(ScheduleError::UnexpectedResponse {
            message: "Exam arrangement page has no exams table".to_string(),
        });
    }

    let optional = |text: Option<&String>| text.filter(|t| !t.is_empty()).cloned();

    Ok(rows
        .filter_map(|row| {
            let cells: Vec<String> = row
                .select(&CELL_SELECTOR)
                .map(|cell| cell.text().collect::<String>().trim().to_string())
                .collect();
            // header rows use <th>
            if cells.len() < 2 {
                return None;
            }
            Some(RawExamRecord {
                course_name: cells[0].clone(),
                raw_time_text: cells[1].clone(),
                canonical_time_text: None,
                room: optional(cells.get(2)),
                seat_number: optional(cells.get(3)),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::NormalizeContext;
    use crate::timetable::Season;

    #[test]
    fn test_salted_password() {
        // sha1("salt-pw")
        assert_eq!(
            salted_password("salt", "pw"),
            "abdd860dca81a42d86edefe2497ce4ca900f8f67"
        );
        assert_ne!(salted_password("salt", "pw"), salted_password("salt2", "pw"));
    }

    #[test]
    fn test_parse_semester() {
        let html = r#"<select id="allSemesters"><option value="201">2022-2023-2</option><option selected="selected" value="221">2023-2024-2</option></select>"#;
        assert_eq!(
            parse_semester(html),
            Some(Semester {
                id: "221".to_string(),
                name: "2023-2024-2".to_string()
            })
        );
        assert_eq!(parse_semester("<select></select>"), None);
    }

    fn datum() -> Value {
        json!({
            "result": {
                "lessonList": [
                    { "id": 101, "courseName": "编译原理" },
                    { "id": 102, "courseName": "操作系统" }
                ],
                "scheduleList": [
                    {
                        "lessonId": 101, "weekIndex": 3, "weekday": 3,
                        "startUnit": 1, "endUnit": 2, "startTime": 800, "endTime": 935,
                        "date": "2024-03-13",
                        "personName": "张老师", "room": { "nameZh": "草堂8-106" }
                    },
                    {
                        "lessonId": 102, "weekIndex": 4, "weekday": 1,
                        "startUnit": 5, "endUnit": 6, "startTime": 1430, "endTime": 1605,
                        "date": "2024-03-18",
                        "personName": null, "room": null
                    }
                ]
            }
        })
    }

    #[test]
    fn test_join_schedule_rows() {
        let rows = join_schedule_rows(&datum(), "2023-2024-2").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text(&["courseName"]).as_deref(), Some("编译原理"));
        assert_eq!(rows[1].text(&["courseName"]).as_deref(), Some("操作系统"));
        assert_eq!(rows[0].text(&[TERM_FIELD]).as_deref(), Some("2023-2024-2"));
        assert_eq!(rows[0].text(PROFILE.schema.room).as_deref(), Some("草堂8-106"));
    }

    #[test]
    fn test_join_rejects_missing_lists() {
        assert!(matches!(
            join_schedule_rows(&json!({ "result": {} }), "2023-2024-2"),
            Err(ScheduleError::ParseError { .. })
        ));
    }

    #[test]
    fn test_anchor_from_rows() {
        let rows = join_schedule_rows(&datum(), "2023-2024-2").unwrap();
        // 2024-03-13 is the Wednesday of week 3
        assert_eq!(anchor_from_rows(&rows), NaiveDate::from_ymd_opt(2024, 2, 26));
        assert_eq!(anchor_from_rows(&[]), None);
    }

    #[test]
    fn test_rows_normalize_with_profile() {
        let rows = join_schedule_rows(&datum(), "2023-2024-2").unwrap();
        let anchor = anchor_from_rows(&rows);
        let context = NormalizeContext::new(&PROFILE, anchor, None);
        let normalized = context.normalize_courses(&rows).unwrap();

        assert_eq!(normalized.skipped, 0);
        assert_eq!(normalized.events.len(), 2);

        // -2 semesters use the summer table
        let compilers = &normalized.events[0];
        assert_eq!(compilers.start.to_string(), "2024-03-13 08:00:00");
        assert_eq!(compilers.end.to_string(), "2024-03-13 09:35:00");
        assert!(compilers.has_room);

        let systems = &normalized.events[1];
        assert_eq!(systems.start.to_string(), "2024-03-18 14:30:00");
        assert_eq!(systems.end.to_string(), "2024-03-18 16:05:00");
        assert_eq!(systems.instructor_name, "未知教师");
        assert_eq!(systems.location, "未知地点");
        assert!(!systems.has_room);
    }

    #[test]
    fn test_period_table_agrees_with_row_clock_times() {
        let rows = join_schedule_rows(&datum(), "2023-2024-2").unwrap();
        let schema = &PROFILE.schema;
        for row in &rows {
            let start = row.number(schema.start_period).unwrap();
            let end = row.number(schema.end_period).unwrap();
            let span = PROFILE.periods.span(start, end, Season::Summer).unwrap();
            assert_eq!(
                Some(span),
                row.clock(schema.clock_start).zip(row.clock(schema.clock_end)),
                "units {start}-{end}"
            );
        }
    }

    #[test]
    fn test_row_clock_times_take_precedence() {
        let mut datum = datum();
        datum["result"]["scheduleList"][0]["startTime"] = json!(810);
        datum["result"]["scheduleList"][0]["endTime"] = json!(940);
        let rows = join_schedule_rows(&datum, "2023-2024-2").unwrap();
        let context = NormalizeContext::new(&PROFILE, anchor_from_rows(&rows), None);
        let events = context.normalize_course(&rows[0]).unwrap();
        assert_eq!(events[0].start.to_string(), "2024-03-13 08:10:00");
        assert_eq!(events[0].end.to_string(), "2024-03-13 09:40:00");
    }

    #[test]
    fn test_string_week_index_dates_the_right_week() {
        let datum = json!({
            "lessonList": [{ "id": 101, "courseName": "编译原理" }],
            "scheduleList": [{
                "lessonId": 101, "weekIndex": "10", "weekday": 1,
                "startUnit": 1, "endUnit": 2, "date": "2024-04-29"
            }]
        });
        let rows = join_schedule_rows(&datum, "2023-2024-2").unwrap();
        let anchor = anchor_from_rows(&rows);
        assert_eq!(anchor, NaiveDate::from_ymd_opt(2024, 2, 26));

        let context = NormalizeContext::new(&PROFILE, anchor, None);
        let events = context.normalize_course(&rows[0]).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].week, 10);
        assert_eq!(events[0].start.to_string(), "2024-04-29 08:00:00");
    }

    #[test]
    fn test_empty_term_has_no_rows_or_anchor() {
        let datum = json!({ "result": { "lessonList": [], "scheduleList": [] } });
        let rows = join_schedule_rows(&datum, "2023-2024-2").unwrap();
        assert!(rows.is_empty());
        assert_eq!(anchor_from_rows(&rows), None);
    }

    #[test]
    fn test_parse_exam_table() {
        let html = r#"
            <table class="table table-bordered" id="exams">
              <tr><th>课程</th><th>时间</th><th>地点</th></tr>
              <tr>
                <td>编译原理
                </td>
                <td class="time">2024-05-22 10:30~12:30</td>
                <td>草堂8-106</td>
                <td id="seat-1700565"></td>
              </tr>
            </table>"#;
        let exams = parse_exam_table(html).unwrap();
        assert_eq!(
            exams,
            vec![RawExamRecord {
                course_name: "编译原理".to_string(),
                raw_time_text: "2024-05-22 10:30~12:30".to_string(),
                canonical_time_text: None,
                room: Some("草堂8-106".to_string()),
                seat_number: None,
            }]
        );
    }

    #[test]
    fn test_missing_exam_table_is_unexpected() {
        assert!(matches!(
            parse_exam_table("<html><body>登录</body></html>"),
            Err(ScheduleError::UnexpectedResponse { .. })
        ));
    }
}
