use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::json;
use service_core::error::AppError;

use crate::{
    dtos::audit::AuditListQuery,
    middleware::CurrentUser,
    models::{AuditAction, AuditLog, Page, PageRequest},
    services::{ClientInfo, Permission, Policy},
    utils::csv::{opt, CsvResponse, CsvWriter},
    AppState,
};

const EXPORT_COLUMNS: &[&str] = &[
    "audit_id",
    "created_utc",
    "actor_user_id",
    "action",
    "entity_type",
    "entity_id",
    "ip_address",
    "user_agent",
    "details",
];

pub async fn list_audit_logs(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<AuditListQuery>,
) -> Result<Json<Page<AuditLog>>, AppError> {
    Policy::require(&user.actor(), Permission::AuditRead)?;
    let page = state
        .store
        .list_audit_logs(&query.filter(), query.page_request())
        .await?;
    Ok(Json(page))
}

pub async fn export_audit_logs(
    State(state): State<AppState>,
    user: CurrentUser,
    client: ClientInfo,
    Query(query): Query<AuditListQuery>,
) -> Result<CsvResponse, AppError> {
    let actor = user.actor();
    Policy::require(&actor, Permission::AuditRead)?;
    Policy::require(&actor, Permission::DataExport)?;

    let logs = state
        .store
        .list_audit_logs(&query.filter(), PageRequest::unbounded())
        .await?;

    let mut csv = CsvWriter::new(EXPORT_COLUMNS);
    for log in &logs.items {
        csv.write_row([
            log.audit_id.to_string(),
            log.created_utc.to_rfc3339(),
            opt(&log.actor_user_id),
            log.action.clone(),
            log.entity_type.clone(),
            opt(&log.entity_id),
            opt(&log.ip_address),
            opt(&log.user_agent),
            opt(&log.details),
        ]);
    }

    // Recorded after the export is built so the file does not contain its own entry.
    state
        .audit
        .record(
            Some(user.user_id),
            AuditAction::DataExported,
            "audit_log",
            None,
            Some(json!({ "export": "audit_logs", "rows": logs.items.len() })),
            &client,
        )
        .await;

    Ok(CsvResponse {
        filename: "audit-log.csv".to_string(),
        body: csv.finish(),
    })
}
