pub mod error;
mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::mcp::{self, tools::RegistryError};
use crate::session::SessionRegistry;
use crate::upstream::UpstreamClient;

use handlers::*;

#[derive(Clone)]
pub struct AppState {
    /// The zero-or-one MCP session slot.
    pub sessions: SessionRegistry,
    /// Shared upstream client handed to each new session's dispatcher.
    pub upstream: UpstreamClient,
}

impl AppState {
    /// Build state with an empty session slot. Fails if the compiled-in tool
    /// registry disagrees with its policy table.
    pub fn new(upstream: UpstreamClient) -> Result<Self, RegistryError> {
        mcp::validate_registry()?;
        Ok(Self {
            sessions: SessionRegistry::new(),
            upstream,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sse", get(sse))
        .route("/message", post(message))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
}
