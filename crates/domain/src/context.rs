use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-run resource budgets.
///
/// `max_turns` is checked before each model call, so a value of `0` rejects
/// a run before the first call is made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    pub max_turns: u32,
    pub max_tokens_per_turn: u32,
    /// Upper bound on engine-executed tool calls per run. `None` = uncapped.
    #[serde(default)]
    pub max_tool_calls: Option<u32>,
    /// Wall-clock bound for the entire run.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Whether this run may suspend on a write tool and hand the decision
    /// to the user. Sub-agents always run with `false`.
    pub can_confirm: bool,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_tokens_per_turn: 4096,
            max_tool_calls: None,
            timeout: None,
            can_confirm: true,
        }
    }
}

impl ExecutionLimits {
    /// Limits for a delegated sub-agent: caller-chosen turn/token budget,
    /// confirmation forbidden.
    pub fn restricted(max_turns: u32, max_tokens_per_turn: u32) -> Self {
        Self {
            max_turns,
            max_tokens_per_turn,
            max_tool_calls: None,
            timeout: None,
            can_confirm: false,
        }
    }
}

/// Identity and budget carried through one engine run.
///
/// Preferences and financial limits are opaque to the core; they are
/// forwarded to tools untouched.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: String,
    pub session_id: String,
    pub conversation_id: Option<String>,
    pub request_id: String,
    /// Request id of the run that spawned this one, for audit chaining.
    pub audit_parent_id: Option<String>,
    /// Agent name recorded in audit entries ("main" for top-level runs).
    pub agent_name: String,
    pub preferences: serde_json::Value,
    pub financial_limits: serde_json::Value,
    pub limits: ExecutionLimits,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            conversation_id: None,
            request_id: uuid::Uuid::new_v4().to_string(),
            audit_parent_id: None,
            agent_name: "main".to_string(),
            preferences: serde_json::Value::Null,
            financial_limits: serde_json::Value::Null,
            limits: ExecutionLimits::default(),
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Derive the context for a delegated sub-agent run.
    ///
    /// Identity is inherited; the session and request ids are fresh, the
    /// audit chain points back at this request, and confirmation is
    /// forbidden regardless of what `limits` says.
    pub fn sub_agent(
        &self,
        agent_name: impl Into<String>,
        mut limits: ExecutionLimits,
    ) -> Self {
        limits.can_confirm = false;
        Self {
            user_id: self.user_id.clone(),
            session_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: None,
            request_id: uuid::Uuid::new_v4().to_string(),
            audit_parent_id: Some(self.request_id.clone()),
            agent_name: agent_name.into(),
            preferences: self.preferences.clone(),
            financial_limits: self.financial_limits.clone(),
            limits,
        }
    }
}
