use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{stream, Stream, StreamExt};
use rmcp::{
    model::{ClientJsonRpcMessage, ServerJsonRpcMessage},
    ServiceExt,
};
use serde::{Deserialize, Serialize};

use crate::mcp::GatewayMcpServer;
use crate::session::{Delivery, SessionId, SessionRegistry};

use super::error::ApiError;
use super::AppState;

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    service: &'static str,
    timestamp: String,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Closes the session when the event stream is dropped.
struct StreamGuard {
    sessions: SessionRegistry,
    id: SessionId,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if !self.sessions.close(self.id) {
            tracing::debug!(session = %self.id, "superseded stream dropped");
        }
    }
}

/// Open the event stream and install a new MCP session in the slot.
pub(super) async fn sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let opened = state.sessions.open();
    let id = opened.info.id;

    let (outbound_tx, outbound_rx) = futures::channel::mpsc::unbounded::<ServerJsonRpcMessage>();
    let server = GatewayMcpServer::new(state.upstream.clone());
    tokio::spawn(run_session(server, outbound_tx, opened.inbound, id));

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/message?sessionId={id}"));
    let messages = outbound_rx.filter_map(move |msg| async move {
        match Event::default().event("message").json_data(&msg) {
            Ok(event) => Some(Ok::<_, Infallible>(event)),
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "dropping unencodable message");
                None
            }
        }
    });

    let guard = StreamGuard {
        sessions: state.sessions.clone(),
        id,
    };
    let events = stream::once(async move { Ok::<_, Infallible>(endpoint) })
        .chain(messages)
        .take_until(opened.detached.cancelled_owned())
        .map(move |event| {
            let _ = &guard;
            event
        });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Drive one MCP session until its inbound channel closes.
async fn run_session(
    server: GatewayMcpServer,
    outbound: futures::channel::mpsc::UnboundedSender<ServerJsonRpcMessage>,
    inbound: futures::channel::mpsc::UnboundedReceiver<ClientJsonRpcMessage>,
    id: SessionId,
) {
    let running = match server.serve((outbound, inbound)).await {
        Ok(running) => running,
        Err(e) => {
            tracing::warn!(session = %id, error = %e, "session ended before initialization");
            return;
        }
    };
    tracing::debug!(session = %id, "session initialized");

    match running.waiting().await {
        Ok(reason) => tracing::debug!(session = %id, ?reason, "session dispatcher stopped"),
        Err(e) => tracing::warn!(session = %id, error = %e, "session dispatcher panicked"),
    }
}

#[derive(Deserialize)]
pub(super) struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Accept one client-to-server JSON-RPC message for the active session.
pub(super) async fn message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let target = match query.session_id {
        Some(raw) => Some(SessionId::parse(&raw).ok_or(ApiError::InvalidSessionId(raw))?),
        None => None,
    };

    if state.sessions.active().is_none() {
        return Err(ApiError::NoActiveSession);
    }

    let message: ClientJsonRpcMessage = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidMessage(e.to_string()))?;

    match state.sessions.deliver(target, message)? {
        Delivery::Delivered => {}
        Delivery::Stale => {
            tracing::debug!(session = ?target, "dropping message for superseded session");
        }
        Delivery::Detached => {
            tracing::debug!(session = ?target, "dropping message for detached session");
        }
    }
    Ok(StatusCode::ACCEPTED)
}
