pub mod auth;
pub mod csrf;

pub use auth::{auth_middleware, CurrentUser, SESSION_COOKIE};
pub use csrf::{csrf_middleware, CSRF_COOKIE, CSRF_HEADER};
