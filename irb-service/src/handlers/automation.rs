use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::PaginationQuery,
    middleware::CurrentUser,
    models::{AutomationLog, Page},
    services::{Permission, Policy},
    AppState,
};

pub async fn list_automation_logs(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Page<AutomationLog>>, AppError> {
    Policy::require(&user.actor(), Permission::AutomationRead)?;
    let page = state
        .store
        .list_automation_logs(query.page_request())
        .await?;
    Ok(Json(page))
}
