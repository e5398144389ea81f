use rmcp::ErrorData;

use crate::upstream::UpstreamError;

/// Failures surfaced to the MCP client as protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("{tool} failed: {source}")]
    Upstream {
        tool: &'static str,
        #[source]
        source: UpstreamError,
    },

    #[error("{tool} failed to encode its result: {source}")]
    Serialize {
        tool: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ToolError {
    pub fn tool(&self) -> &str {
        match self {
            ToolError::UnknownTool(name) => name,
            ToolError::Upstream { tool, .. } | ToolError::Serialize { tool, .. } => tool,
        }
    }
}

impl From<ToolError> for ErrorData {
    fn from(err: ToolError) -> Self {
        let data = Some(serde_json::json!({ "tool": err.tool() }));
        match err {
            ToolError::UnknownTool(_) => ErrorData::invalid_params(err.to_string(), data),
            ToolError::Upstream { .. } | ToolError::Serialize { .. } => {
                ErrorData::internal_error(err.to_string(), data)
            }
        }
    }
}
