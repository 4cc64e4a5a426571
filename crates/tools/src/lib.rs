//! Tool abstraction — the uniform contract every tool implements, the
//! name-indexed registry, and summary-template rendering.

pub mod registry;
pub mod summary;

pub use registry::ToolRegistry;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use teller_domain::Result;

/// One tool invocation as seen by the implementer.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub user_id: String,
    /// Parameter object issued by the model.
    pub input: Value,
    /// Set only on the confirmed-write path: the id of the pending action
    /// the user approved.
    pub confirmation_id: Option<String>,
    pub request_id: String,
}

/// What a tool returns.
///
/// `data` is a free-form JSON value; the engine serializes it into the
/// tool_result content. A `success = false` output is recovered into the
/// conversation rather than terminating the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolOutput {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            metadata: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            metadata: None,
        }
    }
}

/// Uniform tool contract.
///
/// `requires_confirmation` is a static property of the tool: a write tool
/// always suspends for user approval, a read tool never does.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters (`type: "object"`), forwarded
    /// verbatim to the model provider.
    fn input_schema(&self) -> Value;

    fn requires_confirmation(&self) -> bool {
        false
    }

    /// Optional summary template with `{{.field}}` placeholders referring
    /// to top-level keys of the parameter JSON.
    fn summary_template(&self) -> Option<&str> {
        None
    }

    async fn execute(&self, invocation: ToolInvocation) -> Result<ToolOutput>;
}
