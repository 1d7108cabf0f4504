//! HTTP request handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Json, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::state::AppState;
use crate::connection::CometConnection;
use crate::error::{CometError, Result};
use crate::policy::{ConnectionPolicy, PolicyKind};
use crate::protocol::Message;
use crate::transport::{build_framing, channel, ConnectionParams, TransportKind};

/// Cookie carrying the HTTP session id
pub const SESSION_COOKIE: &str = "COMETSESSION";

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let logging = state.config.logging;
    let router = Router::new()
        // Health and status
        .route("/health", get(health_check))
        .route("/status", get(status))
        // Comet channel
        .route("/comet", get(comet).delete(close_session))
        .route("/comet/publish", post(publish))
        .with_state(state);

    if logging {
        router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    } else {
        router
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub http_sessions: usize,
    pub policy: PolicyKind,
    pub scheduled_tasks: usize,
}

/// Status endpoint
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime().as_secs(),
        active_sessions: state.registry.count(),
        http_sessions: state.store.len(),
        policy: state.policy.kind(),
        scheduled_tasks: state.scheduler.pending(),
    })
}

/// Open a Comet stream.
///
/// Binds to the HTTP session named by the `COMETSESSION` cookie, starting a
/// new one when the cookie is missing or stale. `session=false` opens a
/// session-less stream that only carries heartbeats.
async fn comet(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let params = ConnectionParams::from_request(&query, &headers);
    let kind = TransportKind::select(&params);

    let mut new_cookie = None;
    let session = if params.session {
        let http_id = match session_cookie(&headers).filter(|id| state.store.touch(id)) {
            Some(id) => id,
            None => {
                let id = state.create_http_session();
                new_cookie = Some(id.clone());
                id
            },
        };
        match state.registry.get_or_create(&http_id) {
            Ok(session) => Some(session),
            Err(e) => return error_response(&e),
        }
    } else {
        None
    };

    let framing = build_framing(kind, &params, &state.config.comet.transport);
    let mut response_headers = framing.headers(&params);
    if let Some(id) = new_cookie {
        let cookie = format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly");
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response_headers.insert(header::SET_COOKIE, value);
        }
    }

    let (sink, body) = channel();
    let connection = CometConnection::new(
        framing,
        Box::new(sink),
        session,
        state.connection_options(&params),
    );

    match connection.initiate() {
        Ok(()) => suspend(&state, connection),
        Err(e @ CometError::Rejected { .. }) => return error_response(&e),
        // whatever was written, terminate frame included, is still streamed
        Err(e) => {
            tracing::debug!(error = %e, "Connection ended during initiate");
            state.policy.terminate(&connection, !e.is_disconnect());
        },
    }

    (
        StatusCode::OK,
        response_headers,
        Body::from_stream(body.into_stream()),
    )
        .into_response()
}

fn suspend(state: &AppState, connection: Arc<CometConnection>) {
    let policy = Arc::clone(&state.policy);
    match policy.kind() {
        PolicyKind::Blocking => {
            tokio::task::spawn_blocking(move || {
                let result = policy.suspend(&connection);
                ended(policy.as_ref(), &connection, result);
            });
        },
        PolicyKind::NonBlocking => {
            let result = policy.suspend(&connection);
            ended(policy.as_ref(), &connection, result);
        },
    }
}

/// End the connection through the strategy if suspending it failed. A client
/// that went away gets nothing more; anything else is ended by the server.
fn ended(policy: &dyn ConnectionPolicy, connection: &CometConnection, result: Result<()>) {
    if let Err(e) = result {
        tracing::debug!(connection = connection.id(), error = %e, "Suspend ended");
        policy.terminate(connection, !e.is_disconnect());
    }
}

/// Invalidate the caller's HTTP session and its Comet session.
async fn close_session(State(state): State<Arc<AppState>>, headers: HeaderMap) -> StatusCode {
    match session_cookie(&headers) {
        Some(id) if state.registry.invalidate(&id) => StatusCode::NO_CONTENT,
        _ => StatusCode::NOT_FOUND,
    }
}

/// Publish request
#[derive(Deserialize)]
pub struct PublishRequest {
    /// A string is sent as text, anything else through the codec
    pub message: Value,
    /// Restrict delivery to one HTTP session
    #[serde(default)]
    pub session: Option<String>,
}

/// Publish response
#[derive(Serialize)]
pub struct PublishResponse {
    pub delivered: usize,
}

/// Enqueue a message on every live session, or on one.
async fn publish(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PublishRequest>,
) -> Response {
    let message = match req.message {
        Value::String(text) => Message::from(text),
        other => Message::Object(other),
    };

    let targets = match &req.session {
        Some(id) => match state.registry.get(id) {
            Some(session) => vec![session],
            None => {
                return error_response(&CometError::InvalidSession(id.clone()));
            },
        },
        None => state.registry.sessions(),
    };

    let delivered = targets
        .iter()
        .filter(|session| session.enqueue(message.clone()).is_ok())
        .count();
    tracing::debug!(delivered, "Published message");

    (StatusCode::OK, Json(PublishResponse { delivered })).into_response()
}

/// HTTP session id from the request cookies.
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            pair.trim()
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        })
}

fn error_response(error: &CometError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({"error": error.to_string()}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie() {
        let mut headers = HeaderMap::new();
        assert!(session_cookie(&headers).is_none());

        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; COMETSESSION=abc123; other=1"),
        );
        assert_eq!(session_cookie(&headers).as_deref(), Some("abc123"));

        headers.insert(header::COOKIE, HeaderValue::from_static("COMETSESSION="));
        assert!(session_cookie(&headers).is_none());
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(&CometError::InvalidSession("x".into()));
        assert_eq!(response.status(), StatusCode::GONE);
    }
}
