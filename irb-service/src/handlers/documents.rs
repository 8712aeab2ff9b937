use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use super::load_visible_study;
use crate::{
    dtos::PaginationQuery,
    middleware::CurrentUser,
    models::{AuditAction, Document, DocumentKind, NewDocument, Page, StudyStatus},
    services::{metrics::record_document_upload, Actor, ClientInfo, Permission, Policy},
    AppState,
};

const MAX_TITLE_LEN: usize = 300;

async fn load_document(
    state: &AppState,
    actor: &Actor,
    document_id: Uuid,
) -> Result<Document, AppError> {
    let missing = || AppError::not_found(format!("Document {} not found", document_id));
    let document = state
        .store
        .get_document(document_id)
        .await?
        .ok_or_else(missing)?;
    load_visible_study(state, actor, document.study_id)
        .await
        .map_err(|e| match e {
            AppError::NotFound(_) => missing(),
            other => other,
        })?;
    Ok(document)
}

/// Keep file names safe for a quoted `Content-Disposition` value.
fn safe_file_name(name: &str) -> String {
    let cleaned: String = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
        .take(200)
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::bad_request(format!("Invalid multipart upload: {}", e.body_text()))
}

struct Upload {
    kind: DocumentKind,
    title: String,
    file_name: String,
    content_type: String,
    content: Vec<u8>,
}

async fn read_upload(mut multipart: Multipart, max_bytes: usize) -> Result<Upload, AppError> {
    let mut kind = None;
    let mut title = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "kind" => {
                let text = field.text().await.map_err(multipart_error)?;
                kind = Some(
                    text.trim()
                        .parse::<DocumentKind>()
                        .map_err(|e| AppError::bad_request(e.to_string()))?,
                );
            }
            "title" => {
                title = Some(field.text().await.map_err(multipart_error)?.trim().to_string());
            }
            "file" => {
                let file_name = safe_file_name(field.file_name().unwrap_or("document"));
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let content = field.bytes().await.map_err(multipart_error)?.to_vec();
                file = Some((file_name, content_type, content));
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    let kind = kind.ok_or_else(|| AppError::bad_request("Missing 'kind' field"))?;
    let (file_name, content_type, content) =
        file.ok_or_else(|| AppError::bad_request("Missing 'file' field"))?;

    if content.is_empty() {
        return Err(AppError::bad_request("Uploaded file is empty"));
    }
    if content.len() > max_bytes {
        return Err(AppError::bad_request(format!(
            "File exceeds the maximum size of {} bytes",
            max_bytes
        )));
    }

    let title = title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| file_name.clone());
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::bad_request(format!(
            "Title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }

    Ok(Upload {
        kind,
        title,
        file_name,
        content_type,
        content,
    })
}

pub async fn list_documents(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(study_id): Path<Uuid>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Page<Document>>, AppError> {
    let actor = user.actor();
    Policy::require(&actor, Permission::DocumentRead)?;
    load_visible_study(&state, &actor, study_id).await?;

    let page = state
        .store
        .list_documents(study_id, query.page_request())
        .await?;
    Ok(Json(page))
}

/// Upload a document as `multipart/form-data` with `kind`, `title` and
/// `file` parts. Re-uploading the same kind and title adds a new version.
#[tracing::instrument(skip_all, fields(user_id = %user.user_id, %study_id))]
pub async fn upload_document(
    State(state): State<AppState>,
    user: CurrentUser,
    client: ClientInfo,
    Path(study_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let actor = user.actor();
    Policy::require(&actor, Permission::DocumentManage)?;
    let study = load_visible_study(&state, &actor, study_id).await?;
    if study.status == StudyStatus::Closed {
        return Err(AppError::conflict("Documents cannot be added to a closed study"));
    }

    let upload = read_upload(multipart, state.config.limits.max_document_bytes).await?;
    let size = upload.content.len();

    let document = state
        .store
        .create_document(NewDocument {
            study_id,
            kind: upload.kind,
            title: upload.title,
            file_name: upload.file_name,
            content_type: upload.content_type,
            content: upload.content,
            uploaded_by: user.user_id,
        })
        .await?;

    record_document_upload(size);
    state
        .audit
        .record(
            Some(user.user_id),
            AuditAction::DocumentUploaded,
            "document",
            Some(document.document_id),
            Some(json!({
                "study_id": study_id,
                "kind": document.kind,
                "title": document.title,
                "version": document.version,
                "size_bytes": document.size_bytes,
                "checksum_sha256": document.checksum_sha256,
            })),
            &client,
        )
        .await;
    state.stats_cache.invalidate();
    tracing::info!(
        document_id = %document.document_id,
        version = document.version,
        size_bytes = size,
        "Document uploaded"
    );

    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn get_document(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(document_id): Path<Uuid>,
) -> Result<Json<Document>, AppError> {
    let actor = user.actor();
    Policy::require(&actor, Permission::DocumentRead)?;
    let document = load_document(&state, &actor, document_id).await?;
    Ok(Json(document))
}

pub async fn download_document(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(document_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let actor = user.actor();
    Policy::require(&actor, Permission::DocumentRead)?;
    let document = load_document(&state, &actor, document_id).await?;
    let content = state
        .store
        .get_document_content(document_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Document {} not found", document_id)))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, document.content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", safe_file_name(&document.file_name)),
            ),
        ],
        content,
    ))
}

#[tracing::instrument(skip_all, fields(user_id = %user.user_id, %document_id))]
pub async fn delete_document(
    State(state): State<AppState>,
    user: CurrentUser,
    client: ClientInfo,
    Path(document_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let actor = user.actor();
    Policy::require(&actor, Permission::DocumentManage)?;
    let document = load_document(&state, &actor, document_id).await?;

    let study = load_visible_study(&state, &actor, document.study_id).await?;
    if study.status == StudyStatus::Closed {
        return Err(AppError::conflict(
            "Documents of a closed study are part of the permanent record",
        ));
    }

    state.store.delete_document(document_id).await?;

    state
        .audit
        .record(
            Some(user.user_id),
            AuditAction::DocumentDeleted,
            "document",
            Some(document_id),
            Some(json!({
                "study_id": document.study_id,
                "title": document.title,
                "version": document.version,
            })),
            &client,
        )
        .await;
    state.stats_cache.invalidate();

    Ok(StatusCode::NO_CONTENT)
}
