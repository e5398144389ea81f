//! The single MCP session slot.
//!
//! The gateway serves exactly one streaming client at a time. Opening a new
//! event stream installs a fresh session and detaches the previous one: its
//! inbound channel is dropped and its stream is ended, with no notification
//! sent to the old client.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::channel::mpsc;
use parking_lot::Mutex;
use rmcp::model::ClientJsonRpcMessage;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifier handed to the client in the `endpoint` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Public view of the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
}

/// Everything the transport needs to drive a freshly opened session.
pub struct OpenedSession {
    pub info: SessionInfo,
    /// Client-to-server messages posted to the message endpoint.
    pub inbound: mpsc::UnboundedReceiver<ClientJsonRpcMessage>,
    /// Cancelled when this session is superseded.
    pub detached: CancellationToken,
}

/// Outcome of delivering a posted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The message named a session that is no longer active; dropped.
    Stale,
    /// The active session's dispatcher has already stopped reading; dropped.
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no active session")]
    NoActiveSession,
}

struct ActiveSession {
    info: SessionInfo,
    inbound: mpsc::UnboundedSender<ClientJsonRpcMessage>,
    detached: CancellationToken,
}

/// Holds zero or one active session. Cloning yields another handle to the
/// same slot.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    slot: Arc<Mutex<Option<ActiveSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new session, superseding whatever was active.
    pub fn open(&self) -> OpenedSession {
        let (tx, rx) = mpsc::unbounded();
        let detached = CancellationToken::new();
        let info = SessionInfo {
            id: SessionId::new(),
            created_at: Utc::now(),
        };

        let previous = self.slot.lock().replace(ActiveSession {
            info,
            inbound: tx,
            detached: detached.clone(),
        });

        if let Some(old) = previous {
            tracing::info!(old = %old.info.id, new = %info.id, "superseding active session");
            old.detached.cancel();
        } else {
            tracing::info!(session = %info.id, "session opened");
        }

        OpenedSession {
            info,
            inbound: rx,
            detached,
        }
    }

    /// Clear the slot if `id` is the active session. Closing a superseded
    /// session is a no-op and returns false.
    pub fn close(&self, id: SessionId) -> bool {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(active) if active.info.id == id => {
                *slot = None;
                tracing::info!(session = %id, "session closed");
                true
            }
            _ => false,
        }
    }

    /// Detach and remove the active session, ending its event stream. Used at
    /// shutdown so open streams do not hold the listener open.
    pub fn detach_active(&self) -> Option<SessionInfo> {
        let active = self.slot.lock().take()?;
        active.detached.cancel();
        tracing::info!(session = %active.info.id, "session detached");
        Some(active.info)
    }

    pub fn active(&self) -> Option<SessionInfo> {
        self.slot.lock().as_ref().map(|s| s.info)
    }

    /// Forward a client message to the active session.
    ///
    /// `target` is the session id the client was given, if it sent one. A
    /// message with no target goes to whichever session is active.
    pub fn deliver(
        &self,
        target: Option<SessionId>,
        message: ClientJsonRpcMessage,
    ) -> Result<Delivery, SessionError> {
        let slot = self.slot.lock();
        let active = slot.as_ref().ok_or(SessionError::NoActiveSession)?;

        if target.is_some_and(|id| id != active.info.id) {
            return Ok(Delivery::Stale);
        }

        match active.inbound.unbounded_send(message) {
            Ok(()) => Ok(Delivery::Delivered),
            Err(_) => Ok(Delivery::Detached),
        }
    }
}
