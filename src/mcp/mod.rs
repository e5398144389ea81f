pub mod error;
pub mod tools;

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::ToolCallContext, wrapper::Parameters},
    model::*,
    service::RequestContext,
    tool, tool_router, ErrorData, RoleServer, ServerHandler,
};
use serde_json::Value;

use crate::upstream::{ResourceKind, UpstreamClient};

pub use error::ToolError;
use tools::{ListResourcesParams, ResourceFilter, GET_NODE_STATUS, LIST_RESOURCES};

/// Check the compiled-in tool router against the static policy table.
pub fn validate_registry() -> Result<(), tools::RegistryError> {
    tools::validate_tools(&GatewayMcpServer::tool_router().list_all())
}

/// Wrap result data in a single pretty-printed text content item.
fn json_result(tool: &'static str, data: &Value) -> Result<CallToolResult, ToolError> {
    let text = serde_json::to_string_pretty(data)
        .map_err(|source| ToolError::Serialize { tool, source })?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn failure_mode(tool: &str) -> tools::FailureMode {
    // Both tools are covered by validate_registry() at startup.
    tools::policy(tool)
        .map(|p| p.failure_mode)
        .unwrap_or(tools::FailureMode::Strict)
}

// ── MCP server ─────────────────────────────────────────────────────

/// Protocol dispatcher for one MCP session.
#[derive(Clone)]
pub struct GatewayMcpServer {
    upstream: UpstreamClient,
    tool_router: ToolRouter<GatewayMcpServer>,
    /// Serializes tool calls so they complete in arrival order.
    dispatch_turn: Arc<tokio::sync::Mutex<()>>,
}

impl GatewayMcpServer {
    pub fn new(upstream: UpstreamClient) -> Self {
        Self {
            upstream,
            tool_router: Self::tool_router(),
            dispatch_turn: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Tool descriptors in name order.
    pub fn tool_descriptors(&self) -> Vec<Tool> {
        let mut tools = self.tool_router.list_all();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Merge the selected categories, lxc first. Each category fetch follows
    /// the tool's failure mode, so a failed category contributes nothing.
    pub async fn collect_resources(&self, filter: ResourceFilter) -> Result<Vec<Value>, ToolError> {
        let mode = failure_mode(LIST_RESOURCES);
        let mut resources = Vec::new();

        for kind in [ResourceKind::Lxc, ResourceKind::Qemu] {
            if !filter.includes(kind) {
                continue;
            }
            let records = mode
                .absorb(kind.as_str(), self.upstream.list_resources(kind).await)
                .map_err(|source| ToolError::Upstream {
                    tool: LIST_RESOURCES,
                    source,
                })?;
            resources.extend(tools::tag_resources(kind, records));
        }

        Ok(resources)
    }

    pub async fn fetch_node_status(&self) -> Result<Value, ToolError> {
        failure_mode(GET_NODE_STATUS)
            .absorb("node status", self.upstream.node_status().await)
            .map_err(|source| ToolError::Upstream {
                tool: GET_NODE_STATUS,
                source,
            })
    }
}

impl ServerHandler for GatewayMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "pvemcp".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "Read-only MCP gateway to a Proxmox VE node: workload inventory and node status."
                        .to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Use list-resources to enumerate virtual machines and containers on the node \
                 (filter with type = all | qemu | lxc). Use get-node-status for the node's \
                 health record."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(self.tool_descriptors()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let name = request.name.to_string();
        tracing::info!(tool = %name, arguments = ?request.arguments, "tool invocation");

        if !self.tool_router.has_route(&name) {
            let err = ToolError::UnknownTool(name);
            tracing::warn!(error = %err, "rejecting tool call");
            return Err(err.into());
        }

        let _turn = self.dispatch_turn.lock().await;
        let result = self
            .tool_router
            .call(ToolCallContext::new(self, request, context))
            .await;
        if let Err(ref e) = result {
            tracing::error!(tool = %name, error = %e.message, "tool call failed");
        }
        result
    }
}

#[tool_router]
impl GatewayMcpServer {
    #[tool(
        name = "list-resources",
        description = "List virtual machines (qemu) and containers (lxc) on the Proxmox node. Each record carries a 'type' field naming its category. A category whose fetch fails is skipped."
    )]
    async fn inventory(
        &self,
        Parameters(params): Parameters<ListResourcesParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let resources = self.collect_resources(params.r#type).await?;
        Ok(json_result(LIST_RESOURCES, &Value::Array(resources))?)
    }

    #[tool(
        name = "get-node-status",
        description = "Get the status record of the Proxmox node (CPU, memory, uptime, versions)."
    )]
    async fn node_status(&self) -> Result<CallToolResult, ErrorData> {
        let status = self.fetch_node_status().await?;
        Ok(json_result(GET_NODE_STATUS, &status)?)
    }
}
