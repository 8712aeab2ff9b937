use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use super::load_visible_study;
use crate::{
    dtos::studies::{
        CreateStudyRequest, StudyListQuery, TransitionOptionsResponse, TransitionRequest,
        UpdateStudyRequest,
    },
    middleware::CurrentUser,
    models::{
        validate_date_range, AuditAction, NewStudy, Page, PageRequest, Study, StudyStatus,
        StudyUpdate,
    },
    services::{
        metrics::record_study_transition,
        workflow::{available_transitions, plan_transition},
        ClientInfo, Permission, Policy,
    },
    utils::{
        csv::{opt, CsvResponse, CsvWriter},
        ValidatedJson,
    },
    AppState,
};

const EXPORT_COLUMNS: &[&str] = &[
    "study_id",
    "protocol_number",
    "title",
    "status",
    "risk_level",
    "principal_investigator_id",
    "start_date",
    "end_date",
    "target_enrollment",
    "submitted_utc",
    "approved_utc",
    "closed_utc",
    "created_utc",
];

pub async fn list_studies(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<StudyListQuery>,
) -> Result<Json<Page<Study>>, AppError> {
    let mut filter = query.filter();
    filter.scope = Policy::study_scope(&user.actor());
    let page = state
        .store
        .list_studies(&filter, query.page_request())
        .await?;
    Ok(Json(page))
}

#[tracing::instrument(skip_all, fields(user_id = %user.user_id))]
pub async fn create_study(
    State(state): State<AppState>,
    user: CurrentUser,
    client: ClientInfo,
    ValidatedJson(req): ValidatedJson<CreateStudyRequest>,
) -> Result<(StatusCode, Json<Study>), AppError> {
    let actor = user.actor();
    Policy::require(&actor, Permission::StudyCreate)?;

    let principal_investigator_id = match req.principal_investigator_id {
        Some(pi) if pi != user.user_id && !Policy::can_assign_investigator(&actor) => {
            return Err(AppError::forbidden(
                "Only an admin may register a study for another investigator",
            ));
        }
        Some(pi) => pi,
        None => user.user_id,
    };
    validate_date_range(req.start_date, req.end_date)?;

    let study = state
        .store
        .create_study(Study::new(NewStudy {
            protocol_number: req.protocol_number.trim().to_string(),
            title: req.title.trim().to_string(),
            description: req.description,
            principal_investigator_id,
            risk_level: req.risk_level,
            start_date: req.start_date,
            end_date: req.end_date,
            target_enrollment: req.target_enrollment,
            created_by: user.user_id,
        }))
        .await?;

    state
        .audit
        .record(
            Some(user.user_id),
            AuditAction::StudyCreated,
            "study",
            Some(study.study_id),
            Some(json!({ "protocol_number": study.protocol_number })),
            &client,
        )
        .await;
    state.stats_cache.invalidate();
    tracing::info!(study_id = %study.study_id, "Study created");

    Ok((StatusCode::CREATED, Json(study)))
}

/// Every study visible to the caller, matching the list filters, as CSV.
pub async fn export_studies(
    State(state): State<AppState>,
    user: CurrentUser,
    client: ClientInfo,
    Query(query): Query<StudyListQuery>,
) -> Result<CsvResponse, AppError> {
    let actor = user.actor();
    Policy::require(&actor, Permission::DataExport)?;

    let mut filter = query.filter();
    filter.scope = Policy::study_scope(&actor);
    let studies = state
        .store
        .list_studies(&filter, PageRequest::unbounded())
        .await?;

    let mut csv = CsvWriter::new(EXPORT_COLUMNS);
    for s in &studies.items {
        csv.write_row([
            s.study_id.to_string(),
            s.protocol_number.clone(),
            s.title.clone(),
            s.status.to_string(),
            s.risk_level.as_str().to_string(),
            s.principal_investigator_id.to_string(),
            opt(&s.start_date),
            opt(&s.end_date),
            s.target_enrollment.to_string(),
            opt(&s.submitted_utc.map(|t| t.to_rfc3339())),
            opt(&s.approved_utc.map(|t| t.to_rfc3339())),
            opt(&s.closed_utc.map(|t| t.to_rfc3339())),
            s.created_utc.to_rfc3339(),
        ]);
    }

    state
        .audit
        .record(
            Some(user.user_id),
            AuditAction::DataExported,
            "study",
            None,
            Some(json!({ "export": "studies", "rows": studies.items.len() })),
            &client,
        )
        .await;

    Ok(CsvResponse {
        filename: "studies.csv".to_string(),
        body: csv.finish(),
    })
}

pub async fn get_study(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(study_id): Path<Uuid>,
) -> Result<Json<Study>, AppError> {
    let study = load_visible_study(&state, &user.actor(), study_id).await?;
    Ok(Json(study))
}

#[tracing::instrument(skip_all, fields(user_id = %user.user_id, %study_id))]
pub async fn update_study(
    State(state): State<AppState>,
    user: CurrentUser,
    client: ClientInfo,
    Path(study_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateStudyRequest>,
) -> Result<Json<Study>, AppError> {
    let actor = user.actor();
    let study = load_visible_study(&state, &actor, study_id).await?;
    Policy::ensure_can_modify_study(&actor, &study)?;

    let update: StudyUpdate = req.into();
    if update.is_empty() {
        return Err(AppError::bad_request("No fields to update"));
    }
    if let Some(pi) = update.principal_investigator_id {
        if pi != study.principal_investigator_id && !Policy::can_assign_investigator(&actor) {
            return Err(AppError::forbidden(
                "Only an admin may reassign the principal investigator",
            ));
        }
    }

    let mut merged = study.clone();
    merged.apply_update(&update);
    merged.validate_dates()?;

    let changed = changed_fields(&update);
    let updated = state.store.update_study(study_id, update).await?;

    state
        .audit
        .record(
            Some(user.user_id),
            AuditAction::StudyUpdated,
            "study",
            Some(study_id),
            Some(json!({ "fields": changed })),
            &client,
        )
        .await;
    state.stats_cache.invalidate();

    Ok(Json(updated))
}

fn changed_fields(update: &StudyUpdate) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if update.title.is_some() {
        fields.push("title");
    }
    if update.description.is_some() {
        fields.push("description");
    }
    if update.principal_investigator_id.is_some() {
        fields.push("principal_investigator_id");
    }
    if update.risk_level.is_some() {
        fields.push("risk_level");
    }
    if update.start_date.is_some() {
        fields.push("start_date");
    }
    if update.end_date.is_some() {
        fields.push("end_date");
    }
    if update.target_enrollment.is_some() {
        fields.push("target_enrollment");
    }
    fields
}

#[tracing::instrument(skip_all, fields(user_id = %user.user_id, %study_id))]
pub async fn delete_study(
    State(state): State<AppState>,
    user: CurrentUser,
    client: ClientInfo,
    Path(study_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let actor = user.actor();
    let study = load_visible_study(&state, &actor, study_id).await?;
    Policy::ensure_can_modify_study(&actor, &study)?;

    state.store.delete_study(study_id).await?;

    state
        .audit
        .record(
            Some(user.user_id),
            AuditAction::StudyDeleted,
            "study",
            Some(study_id),
            Some(json!({ "protocol_number": study.protocol_number })),
            &client,
        )
        .await;
    state.stats_cache.invalidate();
    tracing::info!("Study deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Move a study through the review workflow.
///
/// The store applies the change only if the study is still in the status the
/// plan was made against, so two reviewers racing on the same study get one
/// success and one 409.
#[tracing::instrument(skip_all, fields(user_id = %user.user_id, %study_id))]
pub async fn transition_study(
    State(state): State<AppState>,
    user: CurrentUser,
    client: ClientInfo,
    Path(study_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<TransitionRequest>,
) -> Result<Json<Study>, AppError> {
    let actor = user.actor();
    let study = load_visible_study(&state, &actor, study_id).await?;

    let plan = plan_transition(&study, req.to, &actor, req.notes.as_deref())?;
    let updated = state.store.apply_transition(&plan).await?;

    record_study_transition(plan.from, plan.to, "api");
    state
        .audit
        .record(
            Some(user.user_id),
            AuditAction::StudyStatusChanged,
            "study",
            Some(study_id),
            Some(json!({
                "from": plan.from,
                "to": plan.to,
                "notes": plan.notes,
            })),
            &client,
        )
        .await;
    state.stats_cache.invalidate();
    tracing::info!(from = %plan.from, to = %plan.to, "Study status changed");

    Ok(Json(updated))
}

pub async fn transition_options(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(study_id): Path<Uuid>,
) -> Result<Json<TransitionOptionsResponse>, AppError> {
    let actor = user.actor();
    let study = load_visible_study(&state, &actor, study_id).await?;
    let allowed: Vec<StudyStatus> = available_transitions(&study, &actor);
    Ok(Json(TransitionOptionsResponse {
        current: study.status,
        allowed,
    }))
}
