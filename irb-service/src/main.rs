use irb_service::{
    build_router,
    config::{IrbConfig, StorageBackend},
    models::{NewUser, Role, User},
    services::{
        metrics::init_metrics, AutomationWorker, IrbStore, MemoryRevocation, MemoryStore,
        PgStore, RedisRevocation, TokenRevocation,
    },
    utils::{hash_password, Password},
    AppState,
};
use secrecy::ExposeSecret;
use service_core::{
    error::AppError,
    observability::{init_tracing, shutdown_tracing},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{signal, sync::watch};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = IrbConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting IRB service"
    );

    let store: Arc<dyn IrbStore> = match config.storage.backend {
        StorageBackend::Postgres => Arc::new(PgStore::connect(&config.storage).await?),
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let revocation: Arc<dyn TokenRevocation> = match &config.redis {
        Some(redis) => Arc::new(RedisRevocation::new(redis).await?),
        None => {
            tracing::warn!("REDIS_URL not set; session revocation is process-local");
            Arc::new(MemoryRevocation::new())
        }
    };

    bootstrap_admin(&config, store.as_ref()).await?;

    let addr = config.common.socket_addr();
    let automation_interval = config.automation.interval_seconds;
    let state = AppState::new(config, store.clone(), revocation);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = if automation_interval > 0 {
        Some(
            AutomationWorker::new(store, state.stats_cache.clone())
                .spawn(Duration::from_secs(automation_interval), shutdown_rx),
        )
    } else {
        tracing::info!("Automation worker disabled");
        None
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let _ = shutdown_tx.send(true);
    if let Some(worker) = worker {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Automation worker terminated abnormally");
        }
    }

    tracing::info!("Service shutdown complete");
    shutdown_tracing();
    Ok(())
}

/// Create the first admin account on an empty database.
async fn bootstrap_admin(config: &IrbConfig, store: &dyn IrbStore) -> Result<(), AppError> {
    if store.count_users().await? > 0 {
        return Ok(());
    }
    let Some(bootstrap) = &config.bootstrap else {
        tracing::warn!(
            "No users exist and BOOTSTRAP_ADMIN_EMAIL/BOOTSTRAP_ADMIN_PASSWORD are not set; nobody can log in"
        );
        return Ok(());
    };

    let password_hash = hash_password(&Password::new(bootstrap.password.expose_secret().clone()))?;
    let admin = store
        .create_user(User::new(NewUser {
            email: bootstrap.email.clone(),
            full_name: "Administrator".to_string(),
            role: Role::Admin,
            password_hash: password_hash.into_string(),
        }))
        .await?;
    tracing::info!(user_id = %admin.user_id, email = %admin.email, "Bootstrap admin created");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
