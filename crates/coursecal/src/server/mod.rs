use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::server::endpoints::{calendar, status};
use crate::types::AppState;

mod endpoints;
mod types;

pub use endpoints::calendar::{ClassQuery, SKIPPED_HEADER};
pub use types::ApiErrorType;

/// Creates a router that can be used by `axum`.
///
/// # Parameters
/// - `app_state`: The app server state.
///
/// # Returns
/// The router.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(status::get_health))
        .route("/schools", get(status::get_schools))
        .route("/class", get(calendar::get_class))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::error::Result;
    use crate::institution::{
        nwafu, AdapterSettings, Credentials, InstitutionAdapter, InstitutionProfile,
        InstitutionRegistry,
    };
    use crate::schedule::{RawExamRecord, RawScheduleRecord};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    /// Portal double that accepts the password `correct`.
    struct FakePortal {
        credentials: Credentials,
        with_anchor: bool,
    }

    impl InstitutionAdapter for FakePortal {
        fn profile(&self) -> &'static InstitutionProfile {
            &nwafu::PROFILE
        }

        fn authenticate(&mut self) -> Result<bool> {
            Ok(self.credentials.password == "correct")
        }

        fn fetch_term_anchor_date(&mut self) -> Result<Option<NaiveDate>> {
            Ok(if self.with_anchor {
                NaiveDate::from_ymd_opt(2024, 2, 26)
            } else {
                None
            })
        }

        fn fetch_raw_course_records(&mut self) -> Result<Vec<RawScheduleRecord>> {
            let rows = [
                json!({
                    "JXBID": "T1", "KCM": "编译原理", "SKJS": "王老师", "JASMC": "教一-201",
                    "SKZC": "1100", "SKXQ": 1, "KSJC": 1, "JSJC": 2, "XNXQDM": "2023-2024-1"
                }),
                json!({ "JXBID": "T2", "SKZC": "1" }),
            ];
            Ok(rows.into_iter().filter_map(RawScheduleRecord::from_value).collect())
        }

        fn fetch_raw_exam_records(&mut self) -> Result<Vec<RawExamRecord>> {
            Ok(vec![RawExamRecord {
                course_name: "编译原理".to_string(),
                raw_time_text: "2024-05-22 10:30~12:30".to_string(),
                ..Default::default()
            }])
        }
    }

    fn fake_portal(
        credentials: Credentials,
        _: &AdapterSettings,
    ) -> Result<Box<dyn InstitutionAdapter>> {
        let with_anchor = credentials.username != "no-anchor";
        Ok(Box::new(FakePortal {
            credentials,
            with_anchor,
        }))
    }

    fn app() -> Router {
        let mut registry = InstitutionRegistry::empty();
        registry.register(&nwafu::PROFILE, fake_portal);
        let state = AppState {
            config: ServiceConfig {
                default_school: "nwafu".to_string(),
                ..ServiceConfig::default()
            },
            registry,
        };
        create_router(Arc::new(state))
    }

    async fn get(uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, _, body) = get("/health").await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_schools_lists_registry() {
        let (status, _, body) = get("/schools").await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body[0]["key"], "nwafu");
        assert_eq!(body[0]["timezone"], "Asia/Shanghai");
    }

    #[tokio::test]
    async fn test_class_returns_calendar() {
        let (status, headers, body) = get("/class?username=2021012345&passwd=correct").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers[header::CONTENT_TYPE],
            "text/calendar; charset=utf-8"
        );
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=calendar.ics"
        );
        assert_eq!(headers[SKIPPED_HEADER], "1");

        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("BEGIN:VCALENDAR\r\n"));
        assert_eq!(text.matches("BEGIN:VEVENT").count(), 3);
    }

    #[tokio::test]
    async fn test_class_known_room_filter() {
        let (status, _, body) =
            get("/class?school=NWAFU&username=s&password=correct&known_room=true").await;
        assert_eq!(status, StatusCode::OK);
        // the exam has no room, both course weeks do
        let text = String::from_utf8(body).unwrap();
        assert_eq!(text.matches("BEGIN:VEVENT").count(), 2);
        assert!(!text.contains("考试"));
    }

    #[tokio::test]
    async fn test_class_requires_credentials() {
        let (status, _, _) = get("/class?username=s").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _, _) = get("/class?username=&password=correct").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_class_unsupported_school() {
        let (status, _, body) = get("/class?school=mit&username=s&password=correct").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Unsupported school");
    }

    #[tokio::test]
    async fn test_class_wrong_password() {
        let (status, _, _) = get("/class?username=s&password=wrong").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_class_missing_anchor() {
        let (status, _, _) = get("/class?username=no-anchor&password=correct").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }
}
