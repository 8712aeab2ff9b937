use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::users::{CreateUserRequest, UpdateUserRequest, UserListQuery},
    middleware::CurrentUser,
    models::{AuditAction, NewUser, Page, SanitizedUser, User, UserUpdate},
    services::{ClientInfo, Permission, Policy},
    utils::{hash_password, Password, ValidatedJson},
    AppState,
};

pub async fn list_users(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Page<SanitizedUser>>, AppError> {
    Policy::require(&user.actor(), Permission::UserManage)?;
    let page = state
        .store
        .list_users(&query.filter(), query.page_request())
        .await?;
    Ok(Json(page.map(SanitizedUser::from)))
}

#[tracing::instrument(skip_all, fields(admin_id = %admin.user_id))]
pub async fn create_user(
    State(state): State<AppState>,
    admin: CurrentUser,
    client: ClientInfo,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<SanitizedUser>), AppError> {
    Policy::require(&admin.actor(), Permission::UserManage)?;

    let password_hash = hash_password(&Password::new(req.password))?;
    let user = state
        .store
        .create_user(User::new(NewUser {
            email: req.email,
            full_name: req.full_name.trim().to_string(),
            role: req.role,
            password_hash: password_hash.into_string(),
        }))
        .await?;

    state
        .audit
        .record(
            Some(admin.user_id),
            AuditAction::UserCreated,
            "user",
            Some(user.user_id),
            Some(json!({ "email": user.email, "role": user.role })),
            &client,
        )
        .await;
    state.stats_cache.invalidate();
    tracing::info!(user_id = %user.user_id, role = %user.role, "User created");

    Ok((StatusCode::CREATED, Json(user.sanitized())))
}

pub async fn get_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<SanitizedUser>, AppError> {
    Policy::require(&user.actor(), Permission::UserManage)?;
    let found = state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User {} not found", user_id)))?;
    Ok(Json(found.sanitized()))
}

#[tracing::instrument(skip_all, fields(admin_id = %admin.user_id, %user_id))]
pub async fn update_user(
    State(state): State<AppState>,
    admin: CurrentUser,
    client: ClientInfo,
    Path(user_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateUserRequest>,
) -> Result<Json<SanitizedUser>, AppError> {
    Policy::require(&admin.actor(), Permission::UserManage)?;

    if admin.user_id == user_id {
        if req.is_active == Some(false) {
            return Err(AppError::bad_request("You cannot deactivate your own account"));
        }
        if req.role.is_some_and(|role| role != admin.role) {
            return Err(AppError::bad_request("You cannot change your own role"));
        }
    }

    let mut changed = Vec::new();
    if req.full_name.is_some() {
        changed.push("full_name");
    }
    if req.role.is_some() {
        changed.push("role");
    }
    if req.is_active.is_some() {
        changed.push("is_active");
    }
    let password_hash = match req.password {
        Some(password) => {
            changed.push("password");
            Some(hash_password(&Password::new(password))?.into_string())
        }
        None => None,
    };
    if changed.is_empty() {
        return Err(AppError::bad_request("No fields to update"));
    }

    let updated = state
        .store
        .update_user(
            user_id,
            UserUpdate {
                full_name: req.full_name.map(|n| n.trim().to_string()),
                role: req.role,
                is_active: req.is_active,
                password_hash,
            },
        )
        .await?;

    let action = if req.is_active == Some(false) {
        AuditAction::UserDeactivated
    } else {
        AuditAction::UserUpdated
    };
    state
        .audit
        .record(
            Some(admin.user_id),
            action,
            "user",
            Some(user_id),
            Some(json!({ "fields": changed })),
            &client,
        )
        .await;
    state.stats_cache.invalidate();

    Ok(Json(updated.sanitized()))
}

/// Users are never hard-deleted; deleting deactivates the account so the
/// audit trail keeps resolving.
#[tracing::instrument(skip_all, fields(admin_id = %admin.user_id, %user_id))]
pub async fn deactivate_user(
    State(state): State<AppState>,
    admin: CurrentUser,
    client: ClientInfo,
    Path(user_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    Policy::require(&admin.actor(), Permission::UserManage)?;
    if admin.user_id == user_id {
        return Err(AppError::bad_request("You cannot deactivate your own account"));
    }

    state
        .store
        .update_user(
            user_id,
            UserUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await?;

    state
        .audit
        .record(
            Some(admin.user_id),
            AuditAction::UserDeactivated,
            "user",
            Some(user_id),
            None,
            &client,
        )
        .await;
    state.stats_cache.invalidate();
    tracing::info!("User deactivated");

    Ok(StatusCode::NO_CONTENT)
}
