use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    models::Role,
    services::{Actor, SessionClaims},
    AppState,
};

pub const SESSION_COOKIE: &str = "irb_session";

/// The authenticated caller, inserted by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub jti: String,
    pub token_exp: i64,
    /// Authenticated by the session cookie rather than a bearer header.
    pub via_cookie: bool,
}

impl CurrentUser {
    pub fn actor(&self) -> Actor {
        Actor::new(self.user_id, self.role)
    }

    fn from_claims(claims: SessionClaims, user_id: Uuid, role: Role, via_cookie: bool) -> Self {
        Self {
            user_id,
            email: claims.email,
            role,
            jti: claims.jti,
            token_exp: claims.exp,
            via_cookie,
        }
    }
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Require a valid, unrevoked session from the bearer header or the
/// session cookie. The user is reloaded so deactivation and role changes
/// take effect immediately.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (token, via_cookie) = match bearer_token(&req) {
        Some(token) => (token, false),
        None => {
            let jar = CookieJar::from_headers(req.headers());
            let token = jar
                .get(SESSION_COOKIE)
                .map(|c| c.value().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::unauthorized("Missing session token"))?;
            (token, true)
        }
    };

    let claims = state.jwt.validate(&token).map_err(|e| {
        tracing::debug!(error = %e, "Rejected session token");
        AppError::unauthorized("Invalid or expired token")
    })?;

    let revoked = state.revocation.is_revoked(&claims.jti).await.map_err(|e| {
        tracing::error!(error = %e, "Revocation store unavailable");
        AppError::ServiceUnavailable
    })?;
    if revoked {
        return Err(AppError::unauthorized("Token has been revoked"));
    }

    let user_id = claims
        .user_id()
        .map_err(|_| AppError::unauthorized("Invalid or expired token"))?;
    let user = state
        .store
        .get_user(user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::unauthorized("Account is not active"))?;

    let current = CurrentUser::from_claims(claims, user.user_id, user.role, via_cookie);
    tracing::Span::current().record("user_id", tracing::field::display(current.user_id));
    req.extensions_mut().insert(current);

    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized("Authentication required"))
    }
}
