use axum::{
    extract::{Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::calendar::{filters, EventFilter};
use crate::error::ScheduleError;
use crate::institution::Credentials;
use crate::pipeline::{build_calendar, CalendarBuild};
use crate::schedule::CalendarEntry;
use crate::server::types::ApiErrorType;
use crate::types::AppState;

/// Response header carrying the number of records that could not be used.
pub const SKIPPED_HEADER: HeaderName = HeaderName::from_static("x-coursecal-skipped");

/// Query parameters for `GET /class`.
#[derive(Debug, Default, Deserialize)]
pub struct ClassQuery {
    pub school: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Accepted as an alias of `password`
    pub passwd: Option<String>,
    /// Only include events that have not started yet
    #[serde(default)]
    pub upcoming: bool,
    /// Only include events whose room is known
    #[serde(default)]
    pub known_room: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Maps pipeline failures to HTTP statuses.
pub(crate) fn schedule_error_to_response(error: ScheduleError) -> Response {
    let (status, message) = match &error {
        ScheduleError::AuthenticationFailure { .. } => {
            (StatusCode::UNAUTHORIZED, "Login rejected by the academic portal")
        }
        ScheduleError::UnsupportedInstitution { .. } => {
            (StatusCode::BAD_REQUEST, "Unsupported school")
        }
        ScheduleError::MissingTermAnchor { .. } => (
            StatusCode::BAD_GATEWAY,
            "Academic portal did not provide the term start date",
        ),
        ScheduleError::Network { .. }
        | ScheduleError::UnexpectedResponse { .. }
        | ScheduleError::ParseError { .. } => {
            (StatusCode::BAD_GATEWAY, "Failed to fetch timetable from the academic portal")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Failed to build calendar"),
    };

    ApiErrorType::from((status, message, Some(error.to_string()))).into_response()
}

/// Runs one build on the calling (blocking) thread.
fn run_build(
    state: &AppState,
    school: &str,
    credentials: Credentials,
    upcoming: bool,
    known_room: bool,
) -> Result<CalendarBuild, ScheduleError> {
    let settings = state.config.adapter_settings();
    let mut adapter = state.registry.create(school, credentials, &settings)?;

    let generated_at = Utc::now();
    let now = generated_at
        .with_timezone(&adapter.profile().timezone)
        .naive_local();
    let starts_after = filters::starts_after(now);
    let has_room = filters::has_known_location();
    let combined = move |entry: &dyn CalendarEntry| {
        (!upcoming || starts_after(entry)) && (!known_room || has_room(entry))
    };
    let filter: Option<EventFilter<'_>> = if upcoming || known_room {
        Some(&combined)
    } else {
        None
    };

    let options = state.config.calendar_options(generated_at);
    build_calendar(adapter.as_mut(), &options, filter)
}

/// GET /class
///
/// Logs into the student's academic portal and returns their timetable and
/// exams as an iCalendar feed.
///
/// Query parameters:
/// - `school` (optional): institution key, defaults to the configured school
/// - `username`, `password` (or `passwd`): portal credentials
/// - `upcoming` (optional): drop events that already started
/// - `known_room` (optional): drop events without a known room
pub async fn get_class(
    State(s): State<Arc<AppState>>,
    Query(params): Query<ClassQuery>,
) -> Response {
    let school = non_empty(params.school)
        .unwrap_or_else(|| s.config.default_school.clone())
        .to_lowercase();
    info!(
        "GET /class (school={}, upcoming={}, known_room={})",
        school, params.upcoming, params.known_room
    );

    let (Some(username), Some(password)) = (
        non_empty(params.username),
        non_empty(params.password).or_else(|| non_empty(params.passwd)),
    ) else {
        return ApiErrorType::from((
            StatusCode::BAD_REQUEST,
            "Both username and password are required",
            None,
        ))
        .into_response();
    };

    if !s.registry.contains(&school) {
        warn!("Rejected request for unsupported school {}", school);
        return schedule_error_to_response(ScheduleError::UnsupportedInstitution { key: school });
    }

    let (upcoming, known_room) = (params.upcoming, params.known_room);
    let state = s.clone();
    let result = tokio::task::spawn_blocking(move || {
        run_build(
            &state,
            &school,
            Credentials::new(username, password),
            upcoming,
            known_room,
        )
    })
    .await;

    match result {
        Ok(Ok(build)) => {
            let skipped = build.report.skipped();
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/calendar; charset=utf-8".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        "attachment; filename=calendar.ics".to_string(),
                    ),
                    (SKIPPED_HEADER, skipped.to_string()),
                ],
                build.document.into_bytes(),
            )
                .into_response()
        }
        Ok(Err(e)) => {
            error!("Failed to build calendar: {}", e);
            schedule_error_to_response(e)
        }
        Err(e) => {
            error!("Calendar build task failed: {}", e);
            ApiErrorType::from((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Calendar build task failed",
                Some(e.to_string()),
            ))
            .into_response()
        }
    }
}
