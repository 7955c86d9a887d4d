//! Error types for timetable reconstruction and calendar generation.

use thiserror::Error;

use crate::timetable::Season;

/// Errors that can occur while fetching, normalizing or serializing a timetable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The portal rejected the supplied credentials
    #[error("Authentication failed for {institution}")]
    AuthenticationFailure { institution: String },

    /// No first-day-of-term date is available, so no course can be dated
    #[error("No term anchor date available for {institution}")]
    MissingTermAnchor { institution: String },

    /// A period index has no entry in the period-time table
    #[error("Period {period} is not defined in the {season} table ({available} periods)")]
    PeriodOutOfRange {
        period: u32,
        season: Season,
        available: usize,
    },

    /// The start period of a record ends after its end period
    #[error("Period span {start}-{end} does not form a valid time range")]
    InvalidPeriodSpan { start: u32, end: u32 },

    /// Exam time text is not of the form `{date} {HH:MM}~{HH:MM}`
    #[error("Malformed exam time text: {text:?}")]
    MalformedTimeText { text: String },

    /// A raw course record has no day-of-week under any known field name
    #[error("Record {record} has no day-of-week field")]
    MissingDayOfWeek { record: String },

    /// A raw course record lacks some other required field
    #[error("Record {record} is missing {field}")]
    MissingField { record: String, field: &'static str },

    /// Week numbers are 1-based
    #[error("Invalid week number: {week}")]
    InvalidWeek { week: u32 },

    /// Day-of-week numbers run from 1 (Monday) to 7 (Sunday)
    #[error("Invalid day of week: {day}")]
    InvalidWeekday { day: u32 },

    /// No adapter is registered under the requested key
    #[error("Unsupported school: {key}")]
    UnsupportedInstitution { key: String },

    /// Network/HTTP request failed
    #[error("Network error: {message}")]
    Network { message: String },

    /// Portal returned something other than what the adapter expects
    #[error("Unexpected response: {message}")]
    UnexpectedResponse { message: String },

    /// Failed to parse a portal payload
    #[error("Parse error: {message}")]
    ParseError { message: String },

    /// Service configuration is invalid
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ScheduleError {
    /// Returns true if this error aborts the whole pipeline run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScheduleError::AuthenticationFailure { .. }
                | ScheduleError::MissingTermAnchor { .. }
                | ScheduleError::UnsupportedInstitution { .. }
                | ScheduleError::Config { .. }
        )
    }

    /// Returns true if this error only invalidates a single raw record.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            ScheduleError::PeriodOutOfRange { .. }
                | ScheduleError::InvalidPeriodSpan { .. }
                | ScheduleError::MalformedTimeText { .. }
                | ScheduleError::MissingDayOfWeek { .. }
                | ScheduleError::MissingField { .. }
                | ScheduleError::InvalidWeek { .. }
                | ScheduleError::InvalidWeekday { .. }
        )
    }
}

impl From<reqwest::Error> for ScheduleError {
    fn from(err: reqwest::Error) -> Self {
        ScheduleError::Network {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for ScheduleError {
    fn from(err: url::ParseError) -> Self {
        ScheduleError::UnexpectedResponse {
            message: format!("invalid URL: {err}"),
        }
    }
}

impl From<serde_json::Error> for ScheduleError {
    fn from(err: serde_json::Error) -> Self {
        ScheduleError::ParseError {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
