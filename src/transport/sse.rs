//! HTTP + Server-Sent-Events transport.
//!
//! `GET /events` opens the event stream for a session; the first event names
//! the paired `POST /rpc?session=<id>` endpoint. Requests posted there are
//! answered as `message` events on the stream.

use super::{handle_request, RpcRequest};
use crate::registry::Dispatcher;
use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SESSION_BUFFER: usize = 64;

#[derive(Clone)]
struct SseState {
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<Mutex<HashMap<String, mpsc::Sender<String>>>>,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session: String,
}

pub fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
    let state = SseState {
        dispatcher,
        sessions: Arc::new(Mutex::new(HashMap::new())),
    };
    Router::new()
        .route("/events", get(events_handler))
        .route("/rpc", post(rpc_handler))
        .route("/healthz", get(health_handler))
        .with_state(state)
}

pub async fn serve(addr: &str, dispatcher: Arc<Dispatcher>) -> Result<()> {
    let router = build_router(dispatcher);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("SSE transport listening on {}", addr);
    axum::serve(listener, router).await.context("SSE server failed")
}

/// GET /events: open a session stream.
async fn events_handler(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let session_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<String>(SESSION_BUFFER);
    state
        .sessions
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .insert(session_id.clone(), tx);
    info!("SSE session {} opened", session_id);

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/rpc?session={}", session_id));
    let messages =
        ReceiverStream::new(rx).map(|payload| Event::default().event("message").data(payload));
    let stream = tokio_stream::once(endpoint)
        .chain(messages)
        .map(Ok::<_, Infallible>);

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// POST /rpc?session=<id>: submit a JSON-RPC request; the response arrives
/// on the session's event stream.
async fn rpc_handler(
    State(state): State<SseState>,
    Query(query): Query<SessionQuery>,
    Json(request): Json<RpcRequest>,
) -> impl IntoResponse {
    let sender = {
        let sessions = state
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions.get(&query.session).cloned()
    };
    let Some(sender) = sender else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "unknown session"})),
        );
    };

    debug!("SSE session {} request: {}", query.session, request.method);
    let Some(response) = handle_request(&state.dispatcher, request).await else {
        return (StatusCode::ACCEPTED, Json(serde_json::json!({"ok": true})));
    };

    let payload = match serde_json::to_string(&response) {
        Ok(payload) => payload,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            );
        }
    };

    if sender.send(payload).await.is_err() {
        // Stream consumer went away; drop the session.
        warn!("SSE session {} closed mid-request", query.session);
        state
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&query.session);
        return (
            StatusCode::GONE,
            Json(serde_json::json!({"error": "session closed"})),
        );
    }

    (StatusCode::ACCEPTED, Json(serde_json::json!({"ok": true})))
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION
    }))
}
