//! Annotation session API
//!
//! Endpoints:
//! - POST   /api/sessions                 create a session (NotStarted)
//! - GET    /api/sessions/:id             current view; re-entering Completed
//!                                        retries an unfinished final flush
//! - PUT    /api/sessions/:id/annotator   set the annotator name
//! - POST   /api/sessions/:id/begin       leave the start page
//! - POST   /api/sessions/:id/submit      score the current sentence
//! - DELETE /api/sessions/:id             flush pending rows, then discard

use annot_common::{time, FlushOutcome, SessionView};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::registry::SessionHandle;
use crate::{ApiError, ApiResult, AppState};

/// Session snapshot returned by every endpoint
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    #[serde(flatten)]
    pub view: SessionView,
}

#[derive(Debug, Deserialize)]
pub struct AnnotatorRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub session: SessionResponse,
    pub saved: bool,
    /// Rows written to the spreadsheet by this submission
    pub flushed: usize,
    /// Non-fatal problems (local log or spreadsheet unavailable)
    pub warnings: Vec<String>,
}

async fn lookup(state: &AppState, id: Uuid) -> ApiResult<SessionHandle> {
    state
        .sessions
        .get(&id)
        .await
        .ok_or(ApiError::SessionNotFound(id))
}

/// POST /api/sessions
pub async fn create_session(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<SessionResponse>)> {
    let session = state.new_session(time::now());
    let view = session.view();
    let (session_id, _) = state.sessions.insert(session).await;

    Ok((StatusCode::CREATED, Json(SessionResponse { session_id, view })))
}

/// GET /api/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionResponse>> {
    let handle = lookup(&state, id).await?;
    let mut session = handle.lock().await;

    // No-op unless the final flush is still outstanding
    if let Err(e) = session.finalize(time::now()).await {
        warn!(session_id = %id, error = %e, "End-of-session flush failed again");
    }

    Ok(Json(SessionResponse {
        session_id: id,
        view: session.view(),
    }))
}

/// PUT /api/sessions/:id/annotator
pub async fn set_annotator(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<AnnotatorRequest>, JsonRejection>,
) -> ApiResult<Json<SessionResponse>> {
    let Json(payload) = payload?;
    let handle = lookup(&state, id).await?;
    let mut session = handle.lock().await;
    session.set_annotator(&payload.name);

    Ok(Json(SessionResponse {
        session_id: id,
        view: session.view(),
    }))
}

/// POST /api/sessions/:id/begin
pub async fn begin_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionResponse>> {
    let handle = lookup(&state, id).await?;
    let mut session = handle.lock().await;
    session.begin();

    Ok(Json(SessionResponse {
        session_id: id,
        view: session.view(),
    }))
}

/// POST /api/sessions/:id/submit
///
/// **Request:** `{"score": 7.5}`
///
/// **Errors:**
/// - 400 Bad Request: empty annotator name, score outside 0..=10 / off the
///   0.5 grid, or a body that is not `{"score": <number>}`
/// - 409 Conflict: session not in progress
///
/// Local log and spreadsheet failures do not fail the request; they are
/// returned in `warnings` and the session still advances.
pub async fn submit_score(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<Json<SubmitResponse>> {
    let Json(payload) = payload?;
    let handle = lookup(&state, id).await?;
    let mut session = handle.lock().await;

    let outcome = session.submit(payload.score, time::now()).await?;

    Ok(Json(SubmitResponse {
        session: SessionResponse {
            session_id: id,
            view: session.view(),
        },
        saved: true,
        flushed: outcome.flushed,
        warnings: outcome.warnings,
    }))
}

/// DELETE /api/sessions/:id
///
/// The session is only discarded once its pending rows reached the
/// spreadsheet; on failure it stays registered (502) so the call can be
/// repeated.
pub async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let handle = lookup(&state, id).await?;
    {
        let mut session = handle.lock().await;
        if let FlushOutcome::Flushed(count) = session.shutdown_flush(time::now()).await? {
            info!(session_id = %id, count, "Flushed pending rows before discarding session");
        }
    }
    state.sessions.remove(&id).await;

    Ok(StatusCode::NO_CONTENT)
}

/// Build session routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(end_session))
        .route("/api/sessions/:id/annotator", put(set_annotator))
        .route("/api/sessions/:id/begin", post(begin_session))
        .route("/api/sessions/:id/submit", post(submit_score))
}
