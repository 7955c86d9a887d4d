//! Rebuilds a student's timetable from a university academic portal and
//! serves it as an iCalendar feed.
//!
//! The pipeline is: [`institution`] adapter → raw rows → [`schedule`]
//! normalizer (using [`timetable`] period and week resolution) → [`calendar`]
//! synthesizer. [`pipeline::build_calendar`] runs it end to end and
//! [`server`] exposes it over HTTP.

pub mod calendar;
pub mod config;
pub mod error;
pub mod institution;
pub mod pipeline;
pub mod schedule;
pub mod server;
pub mod timetable;
pub mod types;

pub use error::{Result, ScheduleError};
