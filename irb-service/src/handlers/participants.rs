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
    dtos::participants::{
        CreateParticipantRequest, ParticipantListQuery, UpdateParticipantRequest,
    },
    middleware::CurrentUser,
    models::{
        AuditAction, EnrollmentStatus, NewParticipant, Page, PageRequest, Participant,
        ParticipantUpdate, StudyStatus,
    },
    services::{Actor, ClientInfo, Permission, Policy},
    utils::{
        csv::{opt, CsvResponse, CsvWriter},
        ValidatedJson,
    },
    AppState,
};

const EXPORT_COLUMNS: &[&str] = &[
    "participant_id",
    "subject_code",
    "enrollment_status",
    "consent_signed",
    "consent_date",
    "date_of_birth",
    "sex",
    "enrolled_by",
    "created_utc",
];

/// Load a participant whose study the caller can see.
async fn load_participant(
    state: &AppState,
    actor: &Actor,
    participant_id: Uuid,
) -> Result<Participant, AppError> {
    let missing = || AppError::not_found(format!("Participant {} not found", participant_id));
    let participant = state
        .store
        .get_participant(participant_id)
        .await?
        .ok_or_else(missing)?;
    load_visible_study(state, actor, participant.study_id)
        .await
        .map_err(|e| match e {
            AppError::NotFound(_) => missing(),
            other => other,
        })?;
    Ok(participant)
}

pub async fn list_participants(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(study_id): Path<Uuid>,
    Query(query): Query<ParticipantListQuery>,
) -> Result<Json<Page<Participant>>, AppError> {
    let actor = user.actor();
    Policy::require(&actor, Permission::ParticipantRead)?;
    load_visible_study(&state, &actor, study_id).await?;

    let page = state
        .store
        .list_participants(study_id, &query.filter(), query.page_request())
        .await?;
    Ok(Json(page))
}

/// Register a participant. Only active studies accept new participants.
#[tracing::instrument(skip_all, fields(user_id = %user.user_id, %study_id))]
pub async fn create_participant(
    State(state): State<AppState>,
    user: CurrentUser,
    client: ClientInfo,
    Path(study_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<CreateParticipantRequest>,
) -> Result<(StatusCode, Json<Participant>), AppError> {
    let actor = user.actor();
    Policy::require(&actor, Permission::ParticipantManage)?;
    let study = load_visible_study(&state, &actor, study_id).await?;

    if study.status != StudyStatus::Active {
        return Err(AppError::conflict(format!(
            "Study is {}; participants can only be added to active studies",
            study.status
        )));
    }
    if req.enrollment_status.is_terminal() {
        return Err(AppError::bad_request(
            "New participants start in screening or enrolled",
        ));
    }
    EnrollmentStatus::Screening.check_change(req.enrollment_status, req.consent_signed)?;
    if req.subject_code.trim().is_empty() {
        return Err(AppError::bad_request("Subject code must not be blank"));
    }

    let participant = state
        .store
        .create_participant(Participant::new(NewParticipant {
            study_id,
            subject_code: req.subject_code,
            enrollment_status: req.enrollment_status,
            consent_signed: req.consent_signed,
            consent_date: req.consent_date,
            date_of_birth: req.date_of_birth,
            sex: req.sex,
            notes: req.notes,
            enrolled_by: user.user_id,
        }))
        .await?;

    state
        .audit
        .record(
            Some(user.user_id),
            AuditAction::ParticipantCreated,
            "participant",
            Some(participant.participant_id),
            Some(json!({
                "study_id": study_id,
                "subject_code": participant.subject_code,
            })),
            &client,
        )
        .await;
    state.stats_cache.invalidate();

    Ok((StatusCode::CREATED, Json(participant)))
}

pub async fn export_participants(
    State(state): State<AppState>,
    user: CurrentUser,
    client: ClientInfo,
    Path(study_id): Path<Uuid>,
    Query(query): Query<ParticipantListQuery>,
) -> Result<CsvResponse, AppError> {
    let actor = user.actor();
    Policy::require(&actor, Permission::ParticipantRead)?;
    Policy::require(&actor, Permission::DataExport)?;
    let study = load_visible_study(&state, &actor, study_id).await?;

    let participants = state
        .store
        .list_participants(study_id, &query.filter(), PageRequest::unbounded())
        .await?;

    let mut csv = CsvWriter::new(EXPORT_COLUMNS);
    for p in &participants.items {
        csv.write_row([
            p.participant_id.to_string(),
            p.subject_code.clone(),
            p.enrollment_status.to_string(),
            p.consent_signed.to_string(),
            opt(&p.consent_date),
            opt(&p.date_of_birth),
            opt(&p.sex),
            p.enrolled_by.to_string(),
            p.created_utc.to_rfc3339(),
        ]);
    }

    state
        .audit
        .record(
            Some(user.user_id),
            AuditAction::DataExported,
            "study",
            Some(study_id),
            Some(json!({ "export": "participants", "rows": participants.items.len() })),
            &client,
        )
        .await;

    Ok(CsvResponse {
        filename: format!("{}-participants.csv", study.protocol_number),
        body: csv.finish(),
    })
}

pub async fn get_participant(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(participant_id): Path<Uuid>,
) -> Result<Json<Participant>, AppError> {
    let actor = user.actor();
    Policy::require(&actor, Permission::ParticipantRead)?;
    let participant = load_participant(&state, &actor, participant_id).await?;
    Ok(Json(participant))
}

#[tracing::instrument(skip_all, fields(user_id = %user.user_id, %participant_id))]
pub async fn update_participant(
    State(state): State<AppState>,
    user: CurrentUser,
    client: ClientInfo,
    Path(participant_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateParticipantRequest>,
) -> Result<Json<Participant>, AppError> {
    let actor = user.actor();
    Policy::require(&actor, Permission::ParticipantManage)?;
    let before = load_participant(&state, &actor, participant_id).await?;

    let update: ParticipantUpdate = req.into();
    let updated = state
        .store
        .update_participant(participant_id, update)
        .await?;

    let mut details = json!({ "study_id": updated.study_id });
    if before.enrollment_status != updated.enrollment_status {
        details["from"] = json!(before.enrollment_status);
        details["to"] = json!(updated.enrollment_status);
    }
    state
        .audit
        .record(
            Some(user.user_id),
            AuditAction::ParticipantUpdated,
            "participant",
            Some(participant_id),
            Some(details),
            &client,
        )
        .await;
    state.stats_cache.invalidate();

    Ok(Json(updated))
}

#[tracing::instrument(skip_all, fields(user_id = %user.user_id, %participant_id))]
pub async fn delete_participant(
    State(state): State<AppState>,
    user: CurrentUser,
    client: ClientInfo,
    Path(participant_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let actor = user.actor();
    Policy::require(&actor, Permission::ParticipantManage)?;
    let participant = load_participant(&state, &actor, participant_id).await?;

    state.store.delete_participant(participant_id).await?;

    state
        .audit
        .record(
            Some(user.user_id),
            AuditAction::ParticipantDeleted,
            "participant",
            Some(participant_id),
            Some(json!({
                "study_id": participant.study_id,
                "subject_code": participant.subject_code,
            })),
            &client,
        )
        .await;
    state.stats_cache.invalidate();

    Ok(StatusCode::NO_CONTENT)
}
