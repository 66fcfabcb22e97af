//! ApiGuard - Adaptive API Security Gateway
//!
//! Fronts a JSON data API with pattern-based threat detection, suspicion
//! scoring, automatic IP bans, tiered rate limiting, and an administrative
//! REST surface.

use anyhow::{Context, Result};
use axum::{extract::Query, middleware, routing::get, Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use apiguard::{
    analytics::AnalyticsRecorder,
    config::ConfigManager,
    management::ManagementServer,
    security::{
        middleware::guard_middleware, BanManager, IpRecordStore, RateLimiter, SecurityPipeline,
        ThreatDetector,
    },
    ShutdownCoordinator,
};

/// CLI arguments for ApiGuard
#[derive(Parser, Debug)]
#[command(name = "apiguard")]
#[command(about = "ApiGuard - Adaptive API Security Gateway")]
#[command(version)]
#[command(long_about = "
ApiGuard - Adaptive API Security Gateway

Scores suspicious behavior per client IP and bans repeat offenders
automatically, with tiered rate limits and a management REST API.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  APIGUARD_BIND_ADDR            - Data API bind address (e.g., 127.0.0.1:3000)
  APIGUARD_MANAGEMENT_BIND_ADDR - Management API bind address
  APIGUARD_LOG_LEVEL            - Log level (trace, debug, info, warn, error)
  APIGUARD_SCORE_THRESHOLD      - Suspicion score that triggers an auto-ban
  APIGUARD_ATTEMPT_THRESHOLD    - Attempt count that triggers an auto-ban
  APIGUARD_AUTO_BAN_MINUTES     - Auto-ban length in minutes (0 = permanent)
  APIGUARD_BAN_FILE             - JSON file for ban table persistence
  APIGUARD_RATE_LIMIT_ENABLED   - Enable rate limiting (true/false)
  APIGUARD_API_KEY              - Management API key
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:3000)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level (overrides config file)")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Ban table persistence file (overrides config file)
    #[arg(long, help = "JSON file for ban table persistence")]
    pub ban_file: Option<PathBuf>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Resolve configuration before tracing init so the file/env log level
    // can take effect. Priority: CLI args > config file > environment > defaults
    let from_file = args.config.exists();
    let mut config = if from_file {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        log_level_override(&args),
        args.ban_file.as_deref(),
    );

    config
        .validate()
        .context("Final configuration validation failed")?;

    init_tracing(&config.monitoring.log_level)?;

    info!(
        "Starting ApiGuard v{} - Adaptive API Security Gateway",
        env!("CARGO_PKG_VERSION")
    );
    if from_file {
        info!("Configuration loaded from {}", args.config.display());
    } else {
        info!("Config file not found, using environment variables and defaults");
    }

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Bind address: {}", config.server.bind_addr);
        info!(
            "  Score threshold: {}",
            config.security.store.score_threshold
        );
        info!(
            "  Attempt threshold: {}",
            config.security.store.attempt_threshold
        );
        info!(
            "  Rate limiting: {}",
            if config.security.rate_limit.enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        info!(
            "  Ban persistence: {}",
            match &config.security.store.persistence_path {
                Some(path) => path.display().to_string(),
                None => "disabled".to_string(),
            }
        );
        info!(
            "  Management API: {}",
            if config.monitoring.management_api.enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        return Ok(());
    }

    info!("Bind address: {}", config.server.bind_addr);

    let shutdown_coordinator = ShutdownCoordinator::new(config.server.shutdown_timeout);

    // Wire up the security components
    let store = Arc::new(IpRecordStore::new(config.security.store.clone()));
    let ban_manager = Arc::new(BanManager::new(store.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(
        config.security.rate_limit.clone(),
        ban_manager.clone(),
    ));
    let analytics = Arc::new(AnalyticsRecorder::new(config.analytics.clone()));
    let pipeline = Arc::new(SecurityPipeline::new(
        config.security.pipeline.clone(),
        ThreatDetector::new(),
        ban_manager.clone(),
        rate_limiter.clone(),
        analytics.clone(),
    ));

    let sweeper_handles = apiguard::sweeper::spawn_sweepers(
        store.clone(),
        rate_limiter,
        analytics.clone(),
        &shutdown_coordinator,
    );

    // Management API server
    let management_handle = if config.monitoring.management_api.enabled {
        let management_server = ManagementServer::new(
            config.monitoring.management_api.bind_addr,
            store,
            ban_manager,
            analytics,
            config.monitoring.management_api.auth.clone(),
        );

        Some(tokio::spawn(async move {
            if let Err(e) = management_server.start().await {
                error!("Management API server error: {}", e);
            }
        }))
    } else {
        info!("Management API server disabled");
        None
    };

    // Guarded data API
    let app = data_router()
        .layer(middleware::from_fn_with_state(pipeline, guard_middleware));

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind data API to {}", config.server.bind_addr))?;
    info!("Data API listening on {}", config.server.bind_addr);

    let mut shutdown_rx = shutdown_coordinator.subscribe();
    let server_handle = tokio::spawn(async move {
        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        });

        if let Err(e) = serve.await {
            error!("Data API server error: {}", e);
        }
    });

    info!("ApiGuard started successfully");
    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
        shutdown_coordinator.signal();
    }

    info!("Initiating graceful shutdown...");

    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Data API task failed: {}", e);
        }
    }

    for handle in sweeper_handles {
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                warn!("Sweeper task failed: {}", e);
            }
        }
    }

    if let Some(handle) = management_handle {
        handle.abort();
        info!("Management API server shutdown");
    }

    info!("Server shutdown complete");

    Ok(())
}

/// The data API fronted by the security middleware. Serves aggregated
/// records keyed by the query parameters it is asked about.
fn data_router() -> Router {
    Router::new()
        .route("/api/data", get(get_data))
        .route("/api/status", get(get_status))
}

async fn get_data(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    Json(json!({
        "query": params,
        "records": [],
        "count": 0,
    }))
}

async fn get_status() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Log level forced from the command line, if any. Merged into the config
/// so the effective level is CLI > file > APIGUARD_LOG_LEVEL > default.
fn log_level_override(args: &CliArgs) -> Option<&str> {
    if args.verbose {
        Some("debug")
    } else {
        args.log_level.as_deref()
    }
}

/// Initialize tracing/logging. RUST_LOG still wins when set.
fn init_tracing(log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
