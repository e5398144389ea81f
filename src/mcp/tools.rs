// MCP tool parameter types, failure policy, and registry checks

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::upstream::{ResourceKind, UpstreamError};

pub const LIST_RESOURCES: &str = "list-resources";
pub const GET_NODE_STATUS: &str = "get-node-status";

/// Resource category filter for `list-resources`. Variants stay
/// undocumented so the schema is a plain string enum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
#[schemars(inline)]
pub enum ResourceFilter {
    #[default]
    All,
    Qemu,
    Lxc,
}

impl ResourceFilter {
    pub fn includes(self, kind: ResourceKind) -> bool {
        match self {
            ResourceFilter::All => true,
            ResourceFilter::Qemu => kind == ResourceKind::Qemu,
            ResourceFilter::Lxc => kind == ResourceKind::Lxc,
        }
    }
}

/// Parameters for the `list-resources` tool.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub struct ListResourcesParams {
    /// Which category to list. Defaults to `all`.
    #[serde(default)]
    #[schemars(description = "Resource category to list: 'all' (default), 'qemu' for virtual machines, or 'lxc' for containers.")]
    pub r#type: ResourceFilter,
}

/// How a tool treats a failed upstream fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Log the failure and continue with an empty contribution.
    Tolerant,
    /// Fail the whole tool call.
    Strict,
}

impl FailureMode {
    /// Apply this policy to one upstream fetch. `what` names the fetch in logs.
    pub fn absorb<T: Default>(
        self,
        what: &str,
        result: Result<T, UpstreamError>,
    ) -> Result<T, UpstreamError> {
        match (self, result) {
            (_, Ok(value)) => Ok(value),
            (FailureMode::Tolerant, Err(e)) => {
                tracing::warn!(fetch = what, error = %e, "upstream fetch failed, skipping");
                Ok(T::default())
            }
            (FailureMode::Strict, Err(e)) => Err(e),
        }
    }
}

/// Static description of one tool's argument fields and failure policy.
#[derive(Debug)]
pub struct ToolPolicy {
    pub name: &'static str,
    pub fields: &'static [&'static str],
    pub failure_mode: FailureMode,
}

pub const TOOL_POLICIES: &[ToolPolicy] = &[
    ToolPolicy {
        name: LIST_RESOURCES,
        fields: &["type"],
        failure_mode: FailureMode::Tolerant,
    },
    ToolPolicy {
        name: GET_NODE_STATUS,
        fields: &[],
        failure_mode: FailureMode::Strict,
    },
];

pub fn policy(name: &str) -> Option<&'static ToolPolicy> {
    TOOL_POLICIES.iter().find(|p| p.name == name)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool {0} has no failure policy")]
    MissingPolicy(String),

    #[error("policy names tool {0} but no handler is registered")]
    MissingHandler(String),

    #[error("tool {0} input schema is not an object schema")]
    NotAnObjectSchema(String),

    #[error("tool {tool} declares fields {declared:?} but its schema has {actual:?}")]
    FieldMismatch {
        tool: String,
        declared: Vec<String>,
        actual: Vec<String>,
    },
}

/// Check a set of tool descriptors against [`TOOL_POLICIES`].
pub fn validate_tools(tools: &[rmcp::model::Tool]) -> Result<(), RegistryError> {
    for tool in tools {
        let name = tool.name.as_ref();
        let policy = policy(name).ok_or_else(|| RegistryError::MissingPolicy(name.to_string()))?;

        let schema = &tool.input_schema;
        if schema.get("type").and_then(Value::as_str) != Some("object") {
            return Err(RegistryError::NotAnObjectSchema(name.to_string()));
        }

        let mut actual: Vec<String> = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default();
        actual.sort();
        let mut declared: Vec<String> = policy.fields.iter().map(|f| f.to_string()).collect();
        declared.sort();
        if actual != declared {
            return Err(RegistryError::FieldMismatch {
                tool: name.to_string(),
                declared,
                actual,
            });
        }
    }

    for policy in TOOL_POLICIES {
        if !tools.iter().any(|t| t.name == policy.name) {
            return Err(RegistryError::MissingHandler(policy.name.to_string()));
        }
    }
    Ok(())
}

/// Mark each record with the category it came from.
pub fn tag_resources(kind: ResourceKind, records: Vec<Value>) -> Vec<Value> {
    records
        .into_iter()
        .map(|mut record| {
            if let Value::Object(ref mut map) = record {
                map.insert("type".to_string(), Value::String(kind.as_str().to_string()));
            }
            record
        })
        .collect()
}
