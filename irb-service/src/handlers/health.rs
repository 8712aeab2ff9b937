use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.store.health_check().await;
    let sessions = state.revocation.health_check().await;

    let healthy = database.is_ok() && sessions.is_ok();
    if let Err(e) = &database {
        tracing::warn!(error = %e, "Health check: store unavailable");
    }
    if let Err(e) = &sessions {
        tracing::warn!(error = %e, "Health check: revocation store unavailable");
    }

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "service": state.config.service_name,
            "version": state.config.service_version,
            "checks": {
                "database": if database.is_ok() { "ok" } else { "unavailable" },
                "sessions": if sessions.is_ok() { "ok" } else { "unavailable" },
            }
        })),
    )
}
