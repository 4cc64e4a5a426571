//! Shared fixtures for engine integration tests: a small financial tool
//! set backed by call counters, and a harness wiring the scripted
//! provider, registry, pending store, and audit sink into an engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use teller_domain::message::ContentBlock;
use teller_domain::Result;
use teller_engine::audit::MemoryAuditSink;
use teller_engine::Engine;
use teller_provider::scripted::ScriptedProvider;
use teller_provider::CompletionResponse;
use teller_sessions::InMemoryPendingActionStore;
use teller_tools::{Tool, ToolInvocation, ToolOutput, ToolRegistry};

pub fn tool_use(id: &str, name: &str, input: Value) -> ContentBlock {
    ContentBlock::ToolUse {
        id: id.into(),
        name: name.into(),
        input,
    }
}

// ── Fixture tools ────────────────────────────────────────────────────

pub struct BalanceTool {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Tool for BalanceTool {
    fn name(&self) -> &str {
        "get_balance"
    }
    fn description(&self) -> &str {
        "Fetch the current account balance"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _invocation: ToolInvocation) -> Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput::ok(json!({"amount": "100"})))
    }
}

pub struct ProfileTool {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Tool for ProfileTool {
    fn name(&self) -> &str {
        "get_profile"
    }
    fn description(&self) -> &str {
        "Fetch the user profile"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _invocation: ToolInvocation) -> Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput::ok(json!({"name": "Alice"})))
    }
}

pub struct SendMoneyTool {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Tool for SendMoneyTool {
    fn name(&self) -> &str {
        "send_money"
    }
    fn description(&self) -> &str {
        "Transfer money to another user"
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "recipient": {"type": "string"},
                "amount": {"type": "string"},
                "currency": {"type": "string"}
            },
            "required": ["recipient", "amount"]
        })
    }
    fn requires_confirmation(&self) -> bool {
        true
    }
    fn summary_template(&self) -> Option<&str> {
        Some("Send {{.amount}} {{.currency}} to {{.recipient}}")
    }
    async fn execute(&self, _invocation: ToolInvocation) -> Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput::ok(json!({"txHash": "0xabc"})))
    }
}

/// Read tool that reports failure through the output contract.
pub struct FlakyTool;

#[async_trait::async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "get_transactions"
    }
    fn description(&self) -> &str {
        "List recent transactions"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _invocation: ToolInvocation) -> Result<ToolOutput> {
        Ok(ToolOutput::fail("ledger unavailable"))
    }
}

/// Read tool that errors out of the execute call itself.
pub struct ThrowingTool;

#[async_trait::async_trait]
impl Tool for ThrowingTool {
    fn name(&self) -> &str {
        "search_users"
    }
    fn description(&self) -> &str {
        "Search for users"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"query": {"type": "string"}}})
    }
    async fn execute(&self, _invocation: ToolInvocation) -> Result<ToolOutput> {
        Err(teller_domain::Error::Other("directory offline".into()))
    }
}

// ── Harness ──────────────────────────────────────────────────────────

pub struct Harness {
    pub engine: Arc<Engine>,
    pub provider: Arc<ScriptedProvider>,
    pub registry: Arc<ToolRegistry>,
    pub pending: Arc<InMemoryPendingActionStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub balance_calls: Arc<AtomicUsize>,
    pub profile_calls: Arc<AtomicUsize>,
    pub send_calls: Arc<AtomicUsize>,
}

pub fn harness(scripts: Vec<CompletionResponse>) -> Harness {
    let provider = Arc::new(ScriptedProvider::new(scripts));
    let registry = Arc::new(ToolRegistry::new());
    let pending = Arc::new(InMemoryPendingActionStore::new());
    let audit = Arc::new(MemoryAuditSink::new());

    let balance_calls = Arc::new(AtomicUsize::new(0));
    let profile_calls = Arc::new(AtomicUsize::new(0));
    let send_calls = Arc::new(AtomicUsize::new(0));

    registry.register(Arc::new(BalanceTool {
        calls: balance_calls.clone(),
    }));
    registry.register(Arc::new(ProfileTool {
        calls: profile_calls.clone(),
    }));
    registry.register(Arc::new(SendMoneyTool {
        calls: send_calls.clone(),
    }));
    registry.register(Arc::new(FlakyTool));
    registry.register(Arc::new(ThrowingTool));

    let engine = Arc::new(
        Engine::new(provider.clone(), registry.clone(), pending.clone())
            .with_audit(audit.clone()),
    );

    Harness {
        engine,
        provider,
        registry,
        pending,
        audit,
        balance_calls,
        profile_calls,
        send_calls,
    }
}
