//! Sub-agent delegation.
//!
//! A sub-agent is a named specialization of the engine: its own system
//! prompt, a tool allow-list, and a smaller budget. [`DelegateTool`]
//! exposes it as a normal read-only tool whose execution re-enters the
//! engine with `can_confirm = false` and the audit chain pointing back at
//! the delegating request.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use teller_domain::context::{ExecutionLimits, RequestContext};
use teller_domain::usage::TokenUsage;
use teller_domain::Result;
use teller_sessions::Session;
use teller_tools::{Tool, ToolInvocation, ToolOutput};

use crate::engine::{Engine, RunInput, RunOutput};

/// Definition of one sub-agent.
#[derive(Debug, Clone)]
pub struct SubAgentSpec {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    /// Subset of the engine's registry this agent may see.
    pub tools: Vec<String>,
    pub max_turns: u32,
    pub max_tokens_per_turn: u32,
}

/// Collapsed terminal output of a delegated run.
#[derive(Debug, Clone, Serialize)]
pub struct SubAgentResult {
    pub success: bool,
    pub text: String,
    pub tools_used: Vec<String>,
    pub usage: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A delegation tool: read-only, never confirms, bounded by the parent's
/// turn and token budgets through ordinary nesting.
pub struct DelegateTool {
    spec: SubAgentSpec,
    engine: Arc<Engine>,
}

impl DelegateTool {
    pub fn new(spec: SubAgentSpec, engine: Arc<Engine>) -> Self {
        Self { spec, engine }
    }
}

#[async_trait::async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task or question to delegate"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, invocation: ToolInvocation) -> Result<ToolOutput> {
        let Some(task) = invocation.input.get("task").and_then(Value::as_str) else {
            return Ok(ToolOutput::fail("missing required argument: task"));
        };

        // Fresh sub-context: inherited identity, restricted limits, audit
        // chained to the delegating request.
        let mut ctx = RequestContext::new(invocation.user_id.clone(), uuid::Uuid::new_v4().to_string());
        ctx.audit_parent_id = Some(invocation.request_id.clone());
        ctx.agent_name = self.spec.name.clone();
        ctx.limits =
            ExecutionLimits::restricted(self.spec.max_turns, self.spec.max_tokens_per_turn);

        let mut session = Session::new(ctx.user_id.clone(), ctx.session_id.clone());

        tracing::info!(
            agent = %self.spec.name,
            parent_request = %invocation.request_id,
            "delegating to sub-agent"
        );

        let mut input = RunInput::message(task);
        input.system_prompt = Some(self.spec.system_prompt.clone());
        input.tool_filter = Some(self.spec.tools.clone());
        let output = self.engine.run(&ctx, &mut session, input).await;

        let result = match output {
            RunOutput::Complete {
                text,
                tools_used,
                usage,
            } => SubAgentResult {
                success: true,
                text,
                tools_used: tools_used.into_iter().map(|t| t.tool).collect(),
                usage,
                error: None,
            },
            RunOutput::ConfirmationNeeded { .. } => {
                // Unreachable when limits are derived correctly; surfaced
                // as a tool failure rather than a panic.
                return Ok(ToolOutput::fail("sub-agent attempted to request confirmation"));
            }
            RunOutput::Error { error, usage } => SubAgentResult {
                success: false,
                text: String::new(),
                tools_used: Vec::new(),
                usage,
                error: Some(error.to_string()),
            },
        };

        let success = result.success;
        let error = result.error.clone();
        let data = serde_json::to_value(result)?;
        Ok(ToolOutput {
            success,
            data,
            error,
            metadata: None,
        })
    }
}
