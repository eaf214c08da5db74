use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dealerdrive::cli::Cli;
use dealerdrive::config::Config;
use dealerdrive::AppState;

/// How often expired sessions are purged from the database
const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !cli.is_serve() {
        init_tracing(cli.log_level.as_deref().unwrap_or("warn"), true);
        return dealerdrive::cli::run_command(&cli).await;
    }

    let config = Config::load(&cli.config)?;
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();
    init_tracing(&log_level, false);

    serve(config).await
}

/// Client commands log to stderr so their output stays clean.
fn init_tracing(level: &str, to_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if to_stderr {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!("Starting DealerDrive v{}", env!("CARGO_PKG_VERSION"));

    // Ensure data directory exists
    dealerdrive::utils::ensure_dir(&config.server.data_dir)?;

    // Initialize database
    let db = dealerdrive::db::init(&config.server.data_dir).await?;

    if config.seed.demo_cars {
        let seeded = dealerdrive::db::seed_demo_cars(&db).await?;
        if seeded > 0 {
            tracing::info!(count = seeded, "Seeded demo cars");
        }
    }

    // Ensure default admin user exists
    dealerdrive::api::auth::ensure_admin_user(
        &db,
        &config.auth.admin_email,
        &config.auth.admin_password,
    )
    .await?;

    let state = Arc::new(AppState::new(config.clone(), db.clone()));

    dealerdrive::api::rate_limit::spawn_cleanup_task(
        state.rate_limiter.clone(),
        config.rate_limit.cleanup_interval,
    );
    dealerdrive::api::csrf::spawn_cleanup_task(
        state.csrf.clone(),
        config.rate_limit.cleanup_interval,
    );

    let session_db = db.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SESSION_CLEANUP_INTERVAL).await;
            match dealerdrive::api::auth::cleanup_expired_sessions(&session_db).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Removed expired sessions"),
                Err(e) => tracing::warn!(error = %e, "Session cleanup failed"),
            }
        }
    });

    let app = dealerdrive::api::create_router(state);

    let api_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&api_addr).await?;

    tracing::info!("API server listening on http://{}", api_addr);

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
