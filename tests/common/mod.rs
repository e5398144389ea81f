#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use pvemcp::api::{router, AppState};
use pvemcp::upstream::{UpstreamClient, UpstreamSettings};

pub const TEST_TOKEN: &str = "root@pam!test=secret";

// ── Fake Proxmox API ───────────────────────────────────────────────

/// What the fake upstream answers for one endpoint.
#[derive(Clone)]
pub enum Reply {
    /// 200 with `{"data": <value>}`.
    Data(Value),
    /// Bare error status.
    Fail(u16),
    /// Like `Data`, answered after a pause.
    Slow(Duration, Value),
}

struct FakeInner {
    lxc: Reply,
    qemu: Reply,
    status: Reply,
    hits: Mutex<Vec<String>>,
    auth: Mutex<Vec<String>>,
}

/// A stand-in for the Proxmox API that records every request.
#[derive(Clone)]
pub struct FakeUpstream {
    inner: Arc<FakeInner>,
}

impl FakeUpstream {
    pub fn new(lxc: Reply, qemu: Reply, status: Reply) -> Self {
        Self {
            inner: Arc::new(FakeInner {
                lxc,
                qemu,
                status,
                hits: Mutex::new(Vec::new()),
                auth: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn healthy() -> Self {
        Self::new(
            Reply::Data(json!([{"id": 100}])),
            Reply::Data(json!([{"id": 200}])),
            Reply::Data(json!({"uptime": 3600, "cpu": 0.05})),
        )
    }

    /// Endpoint names requested so far, in order (`lxc`, `qemu`, `status`).
    pub fn hits(&self) -> Vec<String> {
        self.inner.hits.lock().clone()
    }

    pub fn auth_headers(&self) -> Vec<String> {
        self.inner.auth.lock().clone()
    }

    /// Serve on an ephemeral port and return the API base URL.
    pub async fn start(&self) -> String {
        let app = Router::new()
            .route("/api2/json/nodes/{node}/{what}", get(fake_endpoint))
            .with_state(self.clone());
        let addr = start_test_server(app).await;
        format!("http://{addr}/api2/json")
    }
}

async fn fake_endpoint(
    State(fake): State<FakeUpstream>,
    Path((_node, what)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    fake.inner.hits.lock().push(what.clone());
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        fake.inner.auth.lock().push(auth.to_string());
    }

    let reply = match what.as_str() {
        "lxc" => fake.inner.lxc.clone(),
        "qemu" => fake.inner.qemu.clone(),
        "status" => fake.inner.status.clone(),
        _ => Reply::Fail(404),
    };
    match reply {
        Reply::Data(value) => Json(json!({ "data": value })).into_response(),
        Reply::Slow(delay, value) => {
            tokio::time::sleep(delay).await;
            Json(json!({ "data": value })).into_response()
        }
        Reply::Fail(code) => (
            StatusCode::from_u16(code).unwrap(),
            "upstream exploded",
        )
            .into_response(),
    }
}

// ── Gateway ────────────────────────────────────────────────────────

pub async fn start_test_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

pub fn create_test_state(base_url: &str) -> AppState {
    let upstream = UpstreamClient::new(&UpstreamSettings {
        base_url: base_url.to_string(),
        token: TEST_TOKEN.to_string(),
        node: "pve".to_string(),
        timeout: Duration::from_secs(5),
        verify_tls: false,
    })
    .unwrap();
    AppState::new(upstream).unwrap()
}

/// Start a fake upstream and a gateway in front of it.
pub async fn start_gateway(fake: &FakeUpstream) -> (SocketAddr, AppState) {
    let base_url = fake.start().await;
    let state = create_test_state(&base_url);
    let addr = start_test_server(router(state.clone())).await;
    (addr, state)
}

// ── SSE client ─────────────────────────────────────────────────────

pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Minimal event-stream reader over a streaming reqwest response.
pub struct SseClient {
    response: reqwest::Response,
    buffer: String,
}

impl SseClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let response = reqwest::get(format!("http://{addr}/sse")).await.unwrap();
        assert_eq!(response.status(), 200);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(
            content_type.starts_with("text/event-stream"),
            "unexpected content type: {content_type}"
        );
        Self {
            response,
            buffer: String::new(),
        }
    }

    /// Next event, or None once the server ends the stream.
    pub async fn next_event(&mut self) -> Option<SseEvent> {
        tokio::time::timeout(Duration::from_secs(5), self.read_event())
            .await
            .expect("timed out waiting for SSE event")
    }

    async fn read_event(&mut self) -> Option<SseEvent> {
        loop {
            if let Some(pos) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..pos + 2).collect();
                if let Some(event) = parse_block(&block) {
                    return Some(event);
                }
                continue;
            }
            match self.response.chunk().await {
                Ok(Some(bytes)) => self.buffer.push_str(&String::from_utf8_lossy(&bytes)),
                _ => return None,
            }
        }
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
    })
}

// ── MCP client ─────────────────────────────────────────────────────

/// An MCP client speaking over one event stream.
pub struct McpClient {
    pub sse: SseClient,
    pub http: reqwest::Client,
    pub message_url: String,
    pub endpoint: String,
    next_id: u64,
}

impl McpClient {
    /// Open the event stream and read the endpoint event.
    pub async fn open(addr: SocketAddr) -> Self {
        let mut sse = SseClient::connect(addr).await;
        let first = sse.next_event().await.expect("stream ended before endpoint event");
        assert_eq!(first.event, "endpoint");
        assert!(first.data.starts_with("/message?sessionId="), "got {}", first.data);
        Self {
            sse,
            http: reqwest::Client::new(),
            message_url: format!("http://{addr}{}", first.data),
            endpoint: first.data,
            next_id: 1,
        }
    }

    /// Open and complete the initialize handshake.
    pub async fn connect(addr: SocketAddr) -> Self {
        let mut client = Self::open(addr).await;
        client.initialize().await;
        client
    }

    pub async fn post(&self, body: &Value) -> reqwest::StatusCode {
        self.http
            .post(&self.message_url)
            .json(body)
            .send()
            .await
            .unwrap()
            .status()
    }

    /// Send a request and wait for the response carrying the same id.
    pub async fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        let status = self
            .post(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        assert_eq!(status, 202);
        self.response_for(id).await
    }

    pub async fn response_for(&mut self, id: u64) -> Value {
        loop {
            let event = self.sse.next_event().await.expect("stream ended before response");
            if event.event != "message" {
                continue;
            }
            let json: Value = serde_json::from_str(&event.data).unwrap();
            if json["id"] == id {
                return json;
            }
        }
    }

    pub async fn initialize(&mut self) -> Value {
        let response = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "test", "version": "0.1"},
                }),
            )
            .await;
        let status = self
            .post(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        assert_eq!(status, 202);
        response
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Value {
        self.request("tools/call", json!({"name": name, "arguments": arguments}))
            .await
    }
}

/// Assert a tool call succeeded and decode its single text payload.
pub fn tool_payload(response: &Value) -> Value {
    assert!(response.get("error").is_none(), "unexpected error: {response}");
    let is_error = &response["result"]["isError"];
    assert!(
        is_error.is_null() || is_error == false,
        "Expected isError to be false/absent/null, got: {is_error}"
    );
    let content = response["result"]["content"].as_array().unwrap();
    assert_eq!(content.len(), 1);
    assert_eq!(content[0]["type"], "text");
    let text = content[0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}
