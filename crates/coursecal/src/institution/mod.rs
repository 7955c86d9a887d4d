//! Institution adapters.
//!
//! Each supported university implements [`InstitutionAdapter`] and registers a
//! factory in [`InstitutionRegistry`]. The pipeline only ever talks to the
//! trait; HTTP, login handshakes and scraping stay inside the adapter.

pub mod nwafu;
pub mod xauat;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use chrono_tz::Tz;
use reqwest::cookie::Jar;
use reqwest::redirect::Policy;

use crate::error::{Result, ScheduleError};
use crate::schedule::{RawExamRecord, RawScheduleRecord, RecordSchema};
use crate::timetable::{PeriodTable, SeasonRule};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Display text used when a portal omits a field.
#[derive(Debug, Clone, Copy)]
pub struct FallbackText {
    pub course: &'static str,
    pub instructor: &'static str,
    pub location: &'static str,
    pub seat: &'static str,
}

/// Static description of how one institution's portal encodes its timetable.
#[derive(Debug, Clone, Copy)]
pub struct InstitutionProfile {
    /// Registry key, lowercase
    pub key: &'static str,
    pub display_name: &'static str,
    pub timezone: Tz,
    pub periods: PeriodTable,
    pub season_rule: SeasonRule,
    pub schema: RecordSchema,
    pub fallbacks: FallbackText,
}

/// Login credentials supplied by the student.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// HTTP settings shared by all adapters.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

/// The operations the pipeline needs from an institution's portal.
///
/// Implementations perform blocking I/O and keep whatever session state
/// their portal requires; one instance serves exactly one pipeline run.
pub trait InstitutionAdapter: Send {
    /// Static timetable conventions of this institution.
    fn profile(&self) -> &'static InstitutionProfile;

    /// Logs in. `Ok(false)` means the portal rejected the credentials.
    fn authenticate(&mut self) -> Result<bool>;

    /// First day of week 1 of the current term, if the portal exposes it.
    fn fetch_term_anchor_date(&mut self) -> Result<Option<NaiveDate>>;

    fn fetch_raw_course_records(&mut self) -> Result<Vec<RawScheduleRecord>>;

    fn fetch_raw_exam_records(&mut self) -> Result<Vec<RawExamRecord>>;

    /// Code of the current term, used for rows that do not carry one.
    fn current_term_code(&self) -> Option<&str> {
        None
    }
}

/// Constructs an adapter for one pipeline run.
pub type AdapterFactory =
    fn(Credentials, &AdapterSettings) -> Result<Box<dyn InstitutionAdapter>>;

/// Explicit mapping from institution key to adapter factory.
#[derive(Clone)]
pub struct InstitutionRegistry {
    entries: BTreeMap<&'static str, (&'static InstitutionProfile, AdapterFactory)>,
}

impl InstitutionRegistry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registry with every institution this crate ships an adapter for.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(&xauat::PROFILE, xauat::create);
        registry.register(&nwafu::PROFILE, nwafu::create);
        registry
    }

    pub fn register(&mut self, profile: &'static InstitutionProfile, factory: AdapterFactory) {
        self.entries.insert(profile.key, (profile, factory));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key.to_lowercase().as_str())
    }

    /// Supported institutions, ordered by key.
    pub fn profiles(&self) -> impl Iterator<Item = &'static InstitutionProfile> + '_ {
        self.entries.values().map(|(profile, _)| *profile)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    /// Builds a fresh adapter for `key` (case-insensitive).
    ///
    /// # Errors
    /// [`ScheduleError::UnsupportedInstitution`] if nothing is registered under `key`.
    pub fn create(
        &self,
        key: &str,
        credentials: Credentials,
        settings: &AdapterSettings,
    ) -> Result<Box<dyn InstitutionAdapter>> {
        let (_, factory) = self
            .entries
            .get(key.to_lowercase().as_str())
            .ok_or_else(|| ScheduleError::UnsupportedInstitution {
                key: key.to_string(),
            })?;
        factory(credentials, settings)
    }
}

impl Default for InstitutionRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for InstitutionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

/// Builds the blocking HTTP client an adapter uses for one run.
///
/// Clients built with the same `jar` share one login session.
pub(crate) fn build_client(
    settings: &AdapterSettings,
    follow_redirects: bool,
    accept_invalid_certs: bool,
    jar: Arc<Jar>,
) -> Result<reqwest::blocking::Client> {
    let policy = if follow_redirects {
        Policy::limited(10)
    } else {
        Policy::none()
    };

    reqwest::blocking::Client::builder()
        .cookie_provider(jar)
        .redirect(policy)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .user_agent(&settings.user_agent)
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .build()
        .map_err(|e| ScheduleError::Network {
            message: format!("Failed to build HTTP client: {}", e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timetable::Season;

    #[test]
    fn test_builtin_registry_is_enumerable() {
        let registry = InstitutionRegistry::with_builtin();
        let keys: Vec<_> = registry.keys().collect();
        assert_eq!(keys, vec!["nwafu", "xauat"]);
        assert!(registry.contains("XAUAT"));
        assert!(!registry.contains("mit"));
    }

    #[test]
    fn test_unknown_institution_is_rejected() {
        let registry = InstitutionRegistry::with_builtin();
        let result = registry.create(
            "mit",
            Credentials::new("student", "secret"),
            &AdapterSettings::default(),
        );
        assert_eq!(
            result.err(),
            Some(ScheduleError::UnsupportedInstitution {
                key: "mit".to_string()
            })
        );
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let debug = format!("{:?}", Credentials::new("student", "hunter2"));
        assert!(debug.contains("student"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_builtin_period_tables_are_ordered() {
        for profile in InstitutionRegistry::with_builtin().profiles() {
            for season in [Season::Winter, Season::Summer] {
                let count = profile.periods.len(season) as u32;
                assert!(count > 0, "{} {season}", profile.key);

                let mut previous_end = None;
                for period in 1..=count {
                    let (start, end) = profile.periods.lookup(period, season).unwrap();
                    assert!(start < end, "{} {season} period {period}", profile.key);
                    if let Some(prev) = previous_end {
                        assert!(prev <= start, "{} {season} period {period}", profile.key);
                    }
                    previous_end = Some(end);
                }
            }
        }
    }
}
