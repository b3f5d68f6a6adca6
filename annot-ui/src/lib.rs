//! annot-ui library - Sentiment annotation web service
//!
//! Serves the annotation page and the per-session JSON API, and owns the
//! remote spreadsheet client.

pub mod api;
pub mod cli;
pub mod error;
pub mod registry;
pub mod services;

pub use crate::error::{ApiError, ApiResult};
pub use crate::registry::SessionRegistry;

use annot_common::{AnnotationSession, LocalLog, RemoteLog, SentenceSet};
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Sentences loaded at startup
    pub sentences: SentenceSet,
    /// Local append-only annotation log
    pub local_log: Arc<LocalLog>,
    /// Write-back policy and remote sink shared by all sessions
    pub remote_log: RemoteLog,
    /// Live annotation sessions keyed by session id
    pub sessions: SessionRegistry,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(sentences: SentenceSet, local_log: Arc<LocalLog>, remote_log: RemoteLog) -> Self {
        Self {
            sentences,
            local_log,
            remote_log,
            sessions: SessionRegistry::default(),
            startup_time: Utc::now(),
        }
    }

    /// Fresh session in the `NotStarted` state
    pub fn new_session(&self, now: DateTime<Utc>) -> AnnotationSession {
        AnnotationSession::new(
            self.sentences.clone(),
            self.local_log.clone(),
            self.remote_log.clone(),
            now,
        )
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::ui_routes())
        .merge(api::session_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
