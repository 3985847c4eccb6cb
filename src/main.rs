use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sybertailor::api::rate_limit::spawn_cleanup_task;
use sybertailor::config::{Config, StorageBackend};
use sybertailor::engine::{reschedule_all, spawn_job_runner, JobRunner};
use sybertailor::notifications::mailer_from_config;
use sybertailor::payments::PaystackGateway;
use sybertailor::AppState;

#[derive(Parser, Debug)]
#[command(name = "sybertailor")]
#[command(author, version, about = "Backend for an online and in-person tailoring service", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "sybertailor.toml", env = "SYBERTAILOR_CONFIG")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SyberTailor v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db = sybertailor::db::init(&config.server.data_dir).await?;

    let report = sybertailor::startup::run_startup_checks(&config, &db).await;
    if !report.all_critical_passed {
        anyhow::bail!("Startup checks failed: {}", report.summary);
    }

    if sybertailor::api::auth::ensure_admin_user(&db, &config.auth).await? {
        tracing::info!("Default admin account created");
    }

    let mailer = mailer_from_config(&config.email);
    let storage = sybertailor::storage::from_config(&config).await?;
    let payments = Arc::new(PaystackGateway::new(&config.payments));

    // Bring back delayed notifications lost to a restart
    reschedule_all(&db, &config.scheduler).await?;
    let runner = JobRunner::new(
        db.clone(),
        mailer.clone(),
        config.scheduler.clone(),
        config.email.admin_email.clone(),
    );
    spawn_job_runner(runner, config.scheduler.poll_interval_secs);

    let mut state = AppState::new(config.clone(), db, mailer, storage, payments);
    match sybertailor::api::metrics::init_metrics() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "Metrics recorder unavailable"),
    }
    let state = Arc::new(state);

    if config.rate_limit.enabled {
        spawn_cleanup_task(state.rate_limiter.clone(), config.rate_limit.cleanup_interval);
    }

    let mut app = sybertailor::api::create_router(state.clone());
    if config.storage.backend == StorageBackend::Local {
        app = app.nest_service("/uploads", ServeDir::new(config.uploads_dir()));
    }
    let app = app.layer(CompressionLayer::new());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
