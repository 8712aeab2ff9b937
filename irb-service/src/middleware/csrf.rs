//! Double-submit cookie CSRF protection for cookie-authenticated requests.

use axum::{
    extract::Request,
    http::Method,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;
use service_core::utils::constant_time_eq;

use super::auth::CurrentUser;

pub const CSRF_COOKIE: &str = "irb_csrf";
pub const CSRF_HEADER: &str = "x-csrf-token";

fn is_unsafe(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Runs after `auth_middleware`. Bearer sessions carry no ambient
/// credentials and skip the check.
pub async fn csrf_middleware(req: Request, next: Next) -> Result<Response, AppError> {
    let via_cookie = req
        .extensions()
        .get::<CurrentUser>()
        .map(|user| user.via_cookie)
        .unwrap_or(false);

    if via_cookie && is_unsafe(req.method()) {
        let jar = CookieJar::from_headers(req.headers());
        let cookie = jar.get(CSRF_COOKIE).map(|c| c.value().to_string());
        let header = req
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok());

        let valid = match (cookie.as_deref(), header) {
            (Some(cookie), Some(header)) if !cookie.is_empty() => constant_time_eq(cookie, header),
            _ => false,
        };
        if !valid {
            tracing::warn!(method = %req.method(), path = %req.uri().path(), "CSRF token mismatch");
            return Err(AppError::forbidden("Missing or invalid CSRF token"));
        }
    }

    Ok(next.run(req).await)
}
