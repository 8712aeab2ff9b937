use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::{middleware::CurrentUser, services::DashboardStats, AppState};

pub async fn dashboard_stats(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<DashboardStats>, AppError> {
    let stats = state.stats_cache.dashboard(state.store.as_ref()).await?;
    Ok(Json(stats))
}
