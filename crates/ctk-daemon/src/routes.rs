//! Axum router and all HTTP handlers for ctk-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  Handlers are `pub(crate)`; the scenario tests in
//! `tests/` compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    api_types::{HealthResponse, StatusResponse, SyncErrorResponse, SyncResponse},
    state::{uptime_secs, AppState, BusMsg, SweepTrigger},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (tracing) are **not** applied here; `main.rs` attaches
/// them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route(
            "/v1/dispatches/sync",
            get(sync_dispatches).post(sync_dispatches),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            store: st.store.backend_name().to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let sync = st.sync.read().await.clone();
    (
        StatusCode::OK,
        Json(StatusResponse {
            daemon_uptime_secs: uptime_secs(),
            collection: st.collection.clone(),
            store: st.store.backend_name().to_string(),
            sync,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET|POST /v1/dispatches/sync
// ---------------------------------------------------------------------------

/// Bulk sweep over the dispatch collection.
///
/// 200 with counters on completion; 500 when the read or the batch commit
/// fails (in which case no record was changed).
pub(crate) async fn sync_dispatches(State(st): State<Arc<AppState>>) -> Response {
    match st.run_sweep(SweepTrigger::Http).await {
        Ok(report) => (
            StatusCode::OK,
            Json(SyncResponse {
                success: true,
                message: format!("Synchronized {} dispatch statuses", report.updated),
                total_checked: report.total_checked,
                updated: report.updated,
                errors: report.errors,
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(SyncErrorResponse {
                success: false,
                message: "Failed to synchronize dispatch statuses".to_string(),
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::SweepCompleted(_) => "sweep",
                    BusMsg::MirrorCorrected { .. } => "correction",
                    BusMsg::ReactiveFailed { .. } => "reactive_failure",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
