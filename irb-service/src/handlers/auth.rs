use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde_json::json;
use service_core::{error::AppError, utils::random_token};

use crate::{
    dtos::auth::{LoginRequest, LoginResponse},
    middleware::{CurrentUser, CSRF_COOKIE, SESSION_COOKIE},
    models::{AuditAction, SanitizedUser},
    services::{metrics::record_login, ClientInfo},
    utils::{dummy_hash, verify_password, Password, PasswordHashString, ValidatedJson},
    AppState,
};

const INVALID_CREDENTIALS: &str = "Invalid email or password";

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.security.cookie_secure)
        .build()
}

/// Readable by scripts so the client can echo it in `x-csrf-token`.
fn csrf_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE, token))
        .path("/")
        .http_only(false)
        .same_site(SameSite::Lax)
        .secure(state.config.security.cookie_secure)
        .build()
}

/// Exchange credentials for a session token.
///
/// Unknown emails, wrong passwords and inactive accounts all answer with the
/// same 401 so that callers cannot probe which accounts exist.
#[tracing::instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), AppError> {
    let email = req.email.trim().to_lowercase();
    let password = Password::new(req.password);
    let user = state.store.find_user_by_email(&email).await?;

    let verified = match &user {
        Some(user) => {
            verify_password(&password, &PasswordHashString::new(user.password_hash.clone()))
                .is_ok()
        }
        None => {
            let _ = verify_password(&password, dummy_hash());
            false
        }
    };

    let user = match user {
        Some(user) if verified && user.is_active => user,
        other => {
            let reason = match &other {
                None => "unknown_email",
                Some(u) if !u.is_active && verified => "inactive_account",
                Some(_) => "wrong_password",
            };
            tracing::warn!(reason, email = %email, "Login failed");
            record_login("failure");
            state
                .audit
                .record(
                    other.as_ref().map(|u| u.user_id),
                    AuditAction::UserLoginFailed,
                    "user",
                    other.as_ref().map(|u| u.user_id),
                    Some(json!({ "email": email, "reason": reason })),
                    &client,
                )
                .await;
            return Err(AppError::unauthorized(INVALID_CREDENTIALS));
        }
    };

    let (token, claims) = state.jwt.issue(&user)?;
    let jar = jar
        .add(session_cookie(&state, token.clone()))
        .add(csrf_cookie(&state, random_token(32)));

    record_login("success");
    state
        .audit
        .record(
            Some(user.user_id),
            AuditAction::UserLogin,
            "user",
            Some(user.user_id),
            None,
            &client,
        )
        .await;
    tracing::info!(user_id = %user.user_id, role = %user.role, "User logged in");

    Ok((
        jar,
        Json(LoginResponse {
            access_token: token,
            token_type: "Bearer".to_string(),
            expires_in: claims.remaining_seconds(),
            user: user.sanitized(),
        }),
    ))
}

/// Revoke the current token and clear the session cookies.
#[tracing::instrument(skip_all, fields(user_id = %user.user_id))]
pub async fn logout(
    State(state): State<AppState>,
    client: ClientInfo,
    user: CurrentUser,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AppError> {
    let remaining = (user.token_exp - chrono::Utc::now().timestamp()).max(1);
    state
        .revocation
        .revoke(&user.jti, remaining)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to revoke session token");
            AppError::ServiceUnavailable
        })?;

    state
        .audit
        .record(
            Some(user.user_id),
            AuditAction::UserLogout,
            "user",
            Some(user.user_id),
            None,
            &client,
        )
        .await;

    let jar = jar
        .remove(Cookie::build(SESSION_COOKIE).path("/"))
        .remove(Cookie::build(CSRF_COOKIE).path("/"));
    Ok((jar, StatusCode::NO_CONTENT))
}

pub async fn me(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<SanitizedUser>, AppError> {
    let user = state
        .store
        .get_user(user.user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("Session user no longer exists"))?;
    Ok(Json(user.sanitized()))
}
