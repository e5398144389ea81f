//! Authenticated access to the Proxmox VE management API.
//!
//! One [`UpstreamClient`] is built at startup and shared (cheaply cloned) by
//! every MCP session. Each call either returns the parsed JSON payload or
//! fails once; there are no retries.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-request timeout for upstream calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the upstream API.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Base URL including the API prefix, e.g. `https://pve:8006/api2/json`.
    pub base_url: String,
    /// API token in `USER@REALM!TOKENID=SECRET` form.
    pub token: String,
    /// Management node queried by every tool.
    pub node: String,
    pub timeout: Duration,
    /// When false, certificate validation is skipped. Proxmox installs ship a
    /// self-signed certificate, so this defaults to false.
    pub verify_tls: bool,
}

/// The two workload categories tracked per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Containers.
    Lxc,
    /// Full virtual machines.
    Qemu,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Lxc => "lxc",
            ResourceKind::Qemu => "qemu",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid upstream token: not a valid header value")]
    InvalidToken,

    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("unexpected upstream payload: {0}")]
    UnexpectedShape(String),
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    node: String,
}

impl UpstreamClient {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, UpstreamError> {
        let mut auth = HeaderValue::from_str(&format!("PVEAPIToken={}", settings.token))
            .map_err(|_| UpstreamError::InvalidToken)?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!settings.verify_tls)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(settings.timeout)
            .build()
            .map_err(UpstreamError::Build)?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            node: settings.node.clone(),
        })
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// GET `path` relative to the base URL and return the payload with the
    /// `{"data": ...}` envelope removed.
    pub async fn get_json(&self, path: &str) -> Result<Value, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "upstream GET");

        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { status, body });
        }

        let body: Value = resp.json().await?;
        Ok(unwrap_envelope(body))
    }

    /// Fetch every workload of one category on the configured node.
    pub async fn list_resources(&self, kind: ResourceKind) -> Result<Vec<Value>, UpstreamError> {
        let path = format!("/nodes/{}/{}", self.node, kind);
        match self.get_json(&path).await? {
            Value::Array(items) => Ok(items),
            other => Err(UpstreamError::UnexpectedShape(format!(
                "expected an array of {kind} resources, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Fetch the status record of the configured node, passed through verbatim.
    pub async fn node_status(&self) -> Result<Value, UpstreamError> {
        self.get_json(&format!("/nodes/{}/status", self.node)).await
    }
}

fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
