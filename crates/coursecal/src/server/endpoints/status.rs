use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::types::AppState;

/// GET /health
pub async fn get_health() -> impl IntoResponse {
    info!("GET /health");
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// GET /schools
/// Lists the institutions `/class` accepts.
pub async fn get_schools(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    info!("GET /schools");
    let schools: Vec<_> = s
        .registry
        .profiles()
        .map(|p| {
            json!({
                "key": p.key,
                "name": p.display_name,
                "timezone": p.timezone.name(),
            })
        })
        .collect();
    (StatusCode::OK, Json(schools))
}
