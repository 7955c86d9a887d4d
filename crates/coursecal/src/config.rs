/// Service configuration, read from a JSON file
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::calendar::CalendarOptions;
use crate::error::{Result, ScheduleError};
use crate::institution::AdapterSettings;

/// Top-level configuration. Every field has a default, so `{}` is a valid file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub address: String,
    pub port: u16,
    /// Institution used when a request does not name one
    pub default_school: String,
    /// Maximum `tracing` level: `error`, `warn`, `info`, `debug` or `trace`
    pub log_level: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub calendar_name: String,
    pub calendar_color: String,
    /// IANA zone written as X-WR-TIMEZONE
    pub calendar_timezone: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 5000,
            default_school: "xauat".to_string(),
            log_level: "info".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            calendar_name: "课程表".to_string(),
            calendar_color: "#540EB9".to_string(),
            calendar_timezone: "Asia/Shanghai".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Loads and validates the configuration at `path`.
    ///
    /// # Errors
    /// [`ScheduleError::Config`] if the file cannot be read, is not valid
    /// JSON, or holds invalid values.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| ScheduleError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: ServiceConfig =
            serde_json::from_str(content).map_err(|e| ScheduleError::Config {
                message: format!("Invalid configuration: {}", e),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(ScheduleError::Config { message });

        if self.port == 0 {
            return invalid("port must be non-zero".to_string());
        }
        if self.request_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return invalid("timeouts must be at least one second".to_string());
        }
        if self.log_level.parse::<tracing::Level>().is_err() {
            return invalid(format!("unknown log level {}", self.log_level));
        }
        if self.calendar_timezone.parse::<chrono_tz::Tz>().is_err() {
            return invalid(format!("unknown time zone {}", self.calendar_timezone));
        }
        let color = self.calendar_color.strip_prefix('#').unwrap_or_default();
        if color.len() != 6 || !color.chars().all(|c| c.is_ascii_hexdigit()) {
            return invalid(format!("calendar color {} is not #RRGGBB", self.calendar_color));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..AdapterSettings::default()
        }
    }

    pub fn calendar_options(&self, generated_at: DateTime<Utc>) -> CalendarOptions {
        CalendarOptions {
            name: self.calendar_name.clone(),
            color: self.calendar_color.clone(),
            timezone: self.calendar_timezone.clone(),
            generated_at,
        }
    }
}
