//! annot-ui - Sentence sentiment annotation service
//!
//! Presents sentences one at a time, collects a 0-10 sentiment score per
//! sentence, and records each annotation in a local CSV log and (buffered)
//! in a shared spreadsheet.

use std::sync::Arc;
use std::time::Duration;

use annot_common::config::{load_toml_config, AppConfig};
use annot_common::{time, LocalLog, RemoteLog, SentenceSet};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use annot_ui::cli::Args;
use annot_ui::services::{SheetsClient, TokenSource};
use annot_ui::{build_router, AppState, SessionRegistry};

/// How often idle sessions are looked for
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Resolved before tracing init: the log level comes from the config
    let toml = load_toml_config(&args.config).context("Failed to load configuration")?;
    let config_file_found = toml.is_some();
    let config = AppConfig::resolve(args.overrides(), toml.unwrap_or_default())
        .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},tower_http=info", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting annot-ui v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    if config_file_found {
        info!("Config file: {}", args.config.display());
    } else {
        warn!(
            "Config file {} not found, using defaults",
            args.config.display()
        );
    }

    let sentences = SentenceSet::load(&config.sentences_file).with_context(|| {
        format!("Failed to load sentences from {}", config.sentences_file.display())
    })?;

    let local_log = Arc::new(LocalLog::new(&config.annotations_file));
    local_log
        .ensure_initialized()
        .context("Failed to initialize local annotation log")?;
    info!("Local annotation log: {}", local_log.path().display());

    let http = SheetsClient::http_client().context("Failed to build HTTP client")?;
    let tokens = TokenSource::acquire(&config.auth, http.clone())
        .await
        .context("Failed to acquire spreadsheet credentials")?;
    let sheets = SheetsClient::new(http, tokens, &config.spreadsheet_id, &config.sheet_range)
        .context("Failed to configure spreadsheet client")?;
    info!(
        spreadsheet = %config.spreadsheet_id,
        range = %config.sheet_range,
        flush_threshold_secs = config.flush_threshold.as_secs(),
        "Remote annotation log configured"
    );

    let remote_log = RemoteLog::new(Arc::new(sheets), config.flush_threshold);
    let state = AppState::new(sentences, local_log, remote_log);
    let sessions = state.sessions.clone();
    let app = build_router(state);

    let sweeper = tokio::spawn(evict_idle_sessions(
        sessions.clone(),
        config.session_idle_timeout,
    ));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!("annot-ui listening on http://{}", config.bind_addr);
    info!("Health check: http://{}/health", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    let report = sessions.flush_all(time::now()).await;
    if report.failures > 0 {
        warn!(
            failures = report.failures,
            "Some sessions could not be flushed; their rows are only in the local log"
        );
    }
    info!(
        sessions = report.sessions,
        records = report.records,
        "Server shutdown complete"
    );
    Ok(())
}

/// Periodically flush and discard sessions whose page went away
async fn evict_idle_sessions(sessions: SessionRegistry, idle_timeout: Duration) {
    info!(
        idle_timeout_secs = idle_timeout.as_secs(),
        "Idle session sweep started"
    );
    let mut tick = interval(IDLE_SWEEP_INTERVAL);

    loop {
        tick.tick().await;

        let report = sessions.evict_idle(time::now(), idle_timeout).await;
        if report.sessions > 0 || report.failures > 0 {
            info!(
                evicted = report.sessions,
                records = report.records,
                failures = report.failures,
                "Idle session sweep"
            );
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
