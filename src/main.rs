use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use attendance_api::{
    AppState, Config, Environment, Resource, RouteTable, build_router, metrics, shutdown,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration first: the log format depends on the environment. Warnings
    // raised while loading go to a plain stderr subscriber.
    let loading = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    let config = match tracing::subscriber::with_default(loading, Config::from_env) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(Environment::default(), "info");
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };
    init_tracing(config.environment, &config.log_level);

    info!(
        "Starting Raymond Attendance Management API v{}",
        env!("CARGO_PKG_VERSION")
    );

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Human-readable logs in development and test, JSON lines in production.
fn init_tracing(environment: Environment, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if environment == Environment::Production {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        environment = %config.environment,
        origins = ?config.cors_allowed_origins,
        uploads_dir = %config.uploads_dir.display(),
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        if let Err(e) = metrics::init_metrics(metrics_addr) {
            error!("{e}");
            return Err(exitcode::UNAVAILABLE);
        }
    }

    if !config.uploads_dir.is_dir() {
        warn!(
            uploads_dir = %config.uploads_dir.display(),
            "Uploads directory does not exist; /uploads will answer 404"
        );
    }

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;

    // Resource handler sets are mounted by the services that own them
    let state = AppState::new(config);
    let app = build_router(state.clone(), RouteTable::new());

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API base URL: http://{addr}/api");
    info!("Endpoints:");
    info!("  GET  /                 - Service information");
    info!("  GET  /api/health       - Health check");
    info!("  GET  /uploads/*        - Uploaded files");
    for resource in Resource::ALL {
        info!("  *    {}/*", resource.prefix());
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!(uptime_secs = state.uptime_seconds(), "Server shutdown complete");
    Ok(())
}
