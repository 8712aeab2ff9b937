pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::{sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::IrbConfig;
use crate::services::{AuditRecorder, IrbStore, JwtService, StatsCache, TokenRevocation};

/// Headroom for multipart boundaries and the text parts around the file.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<IrbConfig>,
    pub store: Arc<dyn IrbStore>,
    pub jwt: JwtService,
    pub revocation: Arc<dyn TokenRevocation>,
    pub audit: AuditRecorder,
    pub stats_cache: Arc<StatsCache>,
    pub login_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    pub fn new(
        config: IrbConfig,
        store: Arc<dyn IrbStore>,
        revocation: Arc<dyn TokenRevocation>,
    ) -> Self {
        let limits = &config.rate_limit;
        Self {
            jwt: JwtService::new(&config.jwt),
            audit: AuditRecorder::new(store.clone()),
            stats_cache: Arc::new(StatsCache::new(Duration::from_secs(
                config.limits.stats_cache_ttl_seconds,
            ))),
            login_rate_limiter: create_ip_rate_limiter(
                limits.login_attempts,
                limits.login_window_seconds,
            ),
            ip_rate_limiter: create_ip_rate_limiter(
                limits.global_ip_limit,
                limits.global_ip_window_seconds,
            ),
            config: Arc::new(config),
            store,
            revocation,
        }
    }
}

fn cors_layer(config: &IrbConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .security
        .allowed_origins
        .iter()
        .filter(|origin| {
            let wildcard = origin.as_str() == "*";
            if wildcard {
                tracing::warn!("Wildcard CORS origin ignored; credentials require explicit origins");
            }
            !wildcard
        })
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(middleware::CSRF_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
}

pub fn build_router(state: AppState) -> Router {
    let login_route = Router::new()
        .route("/api/auth/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    // route_layer runs the last-added layer first: auth, then CSRF.
    let protected = Router::new()
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/me", get(handlers::auth::me))
        .route(
            "/api/users",
            get(handlers::users::list_users).post(handlers::users::create_user),
        )
        .route(
            "/api/users/:user_id",
            get(handlers::users::get_user)
                .patch(handlers::users::update_user)
                .delete(handlers::users::deactivate_user),
        )
        .route(
            "/api/studies",
            get(handlers::studies::list_studies).post(handlers::studies::create_study),
        )
        .route("/api/studies/export", get(handlers::studies::export_studies))
        .route(
            "/api/studies/:study_id",
            get(handlers::studies::get_study)
                .patch(handlers::studies::update_study)
                .delete(handlers::studies::delete_study),
        )
        .route(
            "/api/studies/:study_id/transition",
            post(handlers::studies::transition_study),
        )
        .route(
            "/api/studies/:study_id/transitions",
            get(handlers::studies::transition_options),
        )
        .route(
            "/api/studies/:study_id/participants",
            get(handlers::participants::list_participants)
                .post(handlers::participants::create_participant),
        )
        .route(
            "/api/studies/:study_id/participants/export",
            get(handlers::participants::export_participants),
        )
        .route(
            "/api/participants/:participant_id",
            get(handlers::participants::get_participant)
                .patch(handlers::participants::update_participant)
                .delete(handlers::participants::delete_participant),
        )
        .route(
            "/api/studies/:study_id/documents",
            get(handlers::documents::list_documents)
                .post(handlers::documents::upload_document)
                .layer(DefaultBodyLimit::max(
                    state.config.limits.max_document_bytes + MULTIPART_OVERHEAD_BYTES,
                )),
        )
        .route(
            "/api/documents/:document_id",
            get(handlers::documents::get_document).delete(handlers::documents::delete_document),
        )
        .route(
            "/api/documents/:document_id/content",
            get(handlers::documents::download_document),
        )
        .route("/api/audit-logs", get(handlers::audit::list_audit_logs))
        .route(
            "/api/audit-logs/export",
            get(handlers::audit::export_audit_logs),
        )
        .route(
            "/api/automation-logs",
            get(handlers::automation::list_automation_logs),
        )
        .route(
            "/api/dashboard/stats",
            get(handlers::dashboard::dashboard_stats),
        )
        .route_layer(from_fn(middleware::csrf_middleware))
        .route_layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics_handler))
        .merge(login_route)
        .merge(protected)
        .route_layer(from_fn(metrics_middleware))
        .with_state(state.clone())
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    user_id = tracing::field::Empty,
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config))
}
