//! The turn loop — alternates model invocations and tool executions until
//! a terminal output is reached.
//!
//! Every run ends in exactly one of three terminals: `Complete`,
//! `ConfirmationNeeded` (a write tool is suspended awaiting the user), or
//! `Error` (policy denial, exhausted budget, provider failure, protocol
//! violation, or cancellation). Tool failures never terminate a run on
//! their own; they are recovered into the conversation as `is_error`
//! tool results.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::StreamExt;
use serde_json::Value;

use teller_domain::config::EngineConfig;
use teller_domain::context::RequestContext;
use teller_domain::message::ContentBlock;
use teller_domain::pending::PendingAction;
use teller_domain::usage::TokenUsage;
use teller_domain::{Error, Result};
use teller_provider::{CompletionRequest, CompletionResponse, ModelProvider, StreamEvent};
use teller_sessions::{PendingActionStore, Session};
use teller_tools::{Tool, ToolInvocation, ToolOutput, ToolRegistry};

use crate::audit::{AuditEntry, AuditSink};
use crate::cancel::CancelToken;
use crate::guardrails::Guardrails;
use crate::idempotency;
use crate::stream::StreamSink;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run input / output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to a single run.
pub struct RunInput {
    pub user_message: String,
    /// Overrides the engine's default system prompt.
    pub system_prompt: Option<String>,
    /// Overrides the engine's default model id.
    pub model: Option<String>,
    /// Overrides the per-turn token cap from the context limits.
    pub max_tokens: Option<u32>,
    /// Restricts the tools projected to the model. `Some(vec![])` projects
    /// none; `None` projects the full registry.
    pub tool_filter: Option<Vec<String>>,
    pub cancel: CancelToken,
    /// When set, model calls stream and each text delta is forwarded.
    pub stream: Option<Arc<dyn StreamSink>>,
}

impl RunInput {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            user_message: text.into(),
            system_prompt: None,
            model: None,
            max_tokens: None,
            tool_filter: None,
            cancel: CancelToken::new(),
            stream: None,
        }
    }
}

/// One engine-executed tool call.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub tool_use_id: String,
    pub tool: String,
    pub input: Value,
    /// Rendered tool_result content.
    pub output: String,
    pub is_error: bool,
    pub duration_ms: u64,
}

/// Terminal output of one run.
#[derive(Debug)]
pub enum RunOutput {
    Complete {
        text: String,
        tools_used: Vec<ToolExecution>,
        usage: TokenUsage,
    },
    ConfirmationNeeded {
        action: PendingAction,
        /// Tools executed in the iteration that produced the suspension.
        tools_used: Vec<ToolExecution>,
        /// The assistant blocks persisted for this iteration, truncated at
        /// the confirmation tool_use.
        response_blocks: Vec<ContentBlock>,
        text: String,
        usage: TokenUsage,
    },
    Error {
        error: Error,
        usage: TokenUsage,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Engine {
    provider: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    pending: Arc<dyn PendingActionStore>,
    guardrails: Option<Arc<dyn Guardrails>>,
    audit: Option<Arc<dyn AuditSink>>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
        pending: Arc<dyn PendingActionStore>,
    ) -> Self {
        Self {
            provider,
            registry,
            pending,
            guardrails: None,
            audit: None,
            config: EngineConfig::default(),
        }
    }

    pub fn with_guardrails(mut self, guardrails: Arc<dyn Guardrails>) -> Self {
        self.guardrails = Some(guardrails);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run the agentic loop to a terminal output.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        session: &mut Session,
        input: RunInput,
    ) -> RunOutput {
        let mut usage = TokenUsage::default();

        // ── Pre-flight: guardrails, fail fast before any model call ──
        if let Some(guardrails) = &self.guardrails {
            let verdict = guardrails.check(&ctx.user_id);
            if !verdict.allowed {
                let reason = verdict
                    .reason
                    .unwrap_or_else(|| "request denied".to_string());
                tracing::warn!(user_id = %ctx.user_id, reason = %reason, "run denied by guardrails");
                return RunOutput::Error {
                    error: Error::PolicyDenied(reason),
                    usage,
                };
            }
            if let Some(warning) = &verdict.warning {
                tracing::warn!(user_id = %ctx.user_id, warning = %warning, "guardrail warning");
            }
        }

        // ── Defaults ─────────────────────────────────────────────────
        let model = input
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        let system = input
            .system_prompt
            .clone()
            .unwrap_or_else(|| self.config.default_system_prompt.clone());
        let max_tokens = input
            .max_tokens
            .unwrap_or(ctx.limits.max_tokens_per_turn);

        // ── Bounded child deadline for the whole run ─────────────────
        let deadline = ctx
            .limits
            .timeout
            .map(|t| tokio::time::Instant::now() + t);

        session.push_user(input.user_message.as_str());

        let mut run_text = String::new();
        let mut run_tools: Vec<ToolExecution> = Vec::new();
        let mut executed_calls: u32 = 0;

        loop {
            // ── Loop invariant checks ────────────────────────────────
            if session.turn_count() >= ctx.limits.max_turns {
                return RunOutput::Error {
                    error: Error::BudgetExceeded(format!(
                        "exceeded maximum turns ({})",
                        ctx.limits.max_turns
                    )),
                    usage,
                };
            }
            if input.cancel.is_cancelled() {
                return RunOutput::Error {
                    error: Error::Cancelled("run cancelled".into()),
                    usage,
                };
            }
            if let Some(at) = deadline {
                if tokio::time::Instant::now() >= at {
                    return RunOutput::Error {
                        error: Error::BudgetExceeded("timed out".into()),
                        usage,
                    };
                }
            }
            if let Some(id) = session.unanswered_tool_use() {
                return RunOutput::Error {
                    error: Error::Protocol(format!(
                        "tool invocation {id} has no result; confirm or cancel it first"
                    )),
                    usage,
                };
            }

            session.increment_turn();
            tracing::debug!(
                turn = session.turn_count(),
                session_id = %ctx.session_id,
                "model call"
            );

            let request = CompletionRequest {
                model: model.clone(),
                system: system.clone(),
                messages: session.messages().to_vec(),
                tools: self.registry.schemas(input.tool_filter.as_deref()),
                max_tokens,
            };

            let response = match self
                .call_model(&request, input.stream.as_deref(), deadline, &input.cancel)
                .await
            {
                Ok(response) => response,
                Err(error) => {
                    if error.is_provider_failure() {
                        if let Some(guardrails) = &self.guardrails {
                            guardrails.record_failure(&ctx.user_id);
                        }
                    }
                    return RunOutput::Error { error, usage };
                }
            };
            usage.add(&response.usage);

            // ── Walk the returned blocks in order ────────────────────
            let mut iter_text = String::new();
            let mut iter_tools: Vec<ToolExecution> = Vec::new();
            let mut results: Vec<ContentBlock> = Vec::new();
            let mut pending_action: Option<PendingAction> = None;
            let mut blocks_taken = 0usize;

            for block in &response.content {
                blocks_taken += 1;
                match block {
                    ContentBlock::Text { text } => iter_text.push_str(text),
                    ContentBlock::ToolUse {
                        id,
                        name,
                        input: params,
                    } => {
                        let Some(tool) = self.registry.get(name) else {
                            results.push(ContentBlock::tool_result(
                                id.as_str(),
                                format!("unknown tool: {name}"),
                                true,
                            ));
                            continue;
                        };

                        if tool.requires_confirmation() {
                            if !ctx.limits.can_confirm {
                                results.push(ContentBlock::tool_result(
                                    id.as_str(),
                                    "error: this operation requires user confirmation",
                                    true,
                                ));
                                continue;
                            }
                            match self.materialize_pending(ctx, id, tool.as_ref(), params).await
                            {
                                Ok(action) => {
                                    pending_action = Some(action);
                                    // Later blocks are re-emitted by the
                                    // model on resumption.
                                    break;
                                }
                                Err(error) => return RunOutput::Error { error, usage },
                            }
                        } else {
                            if input.cancel.is_cancelled() {
                                return RunOutput::Error {
                                    error: Error::Cancelled("run cancelled".into()),
                                    usage,
                                };
                            }
                            if let Some(max) = ctx.limits.max_tool_calls {
                                if executed_calls >= max {
                                    return RunOutput::Error {
                                        error: Error::BudgetExceeded(format!(
                                            "exceeded maximum tool calls ({max})"
                                        )),
                                        usage,
                                    };
                                }
                            }
                            let execution = self
                                .execute_read_tool(ctx, id, tool.as_ref(), params, deadline)
                                .await;
                            results.push(ContentBlock::tool_result(
                                execution.tool_use_id.as_str(),
                                execution.output.as_str(),
                                execution.is_error,
                            ));
                            iter_tools.push(execution);
                            executed_calls += 1;
                        }
                    }
                    ContentBlock::ToolResult { .. } => {
                        tracing::debug!("ignoring tool_result block in model output");
                    }
                }
            }

            run_text.push_str(&iter_text);

            // ── Terminate or continue ────────────────────────────────
            if let Some(action) = pending_action {
                let kept: Vec<ContentBlock> = response.content[..blocks_taken].to_vec();
                session.push_assistant_blocks(kept.clone());
                session.push_tool_results(results);
                if let Some(guardrails) = &self.guardrails {
                    guardrails.record_success(&ctx.user_id);
                }
                tracing::info!(
                    action_id = %action.id,
                    tool = %action.tool_name,
                    "run suspended awaiting confirmation"
                );
                return RunOutput::ConfirmationNeeded {
                    action,
                    tools_used: iter_tools,
                    response_blocks: kept,
                    text: run_text,
                    usage,
                };
            }

            let had_tool_use = response
                .content
                .iter()
                .any(|b| matches!(b, ContentBlock::ToolUse { .. }));

            if !had_tool_use {
                session.push_assistant_text(iter_text.as_str());
                if let Some(sink) = &input.stream {
                    sink.emit("", true);
                }
                if let Some(guardrails) = &self.guardrails {
                    guardrails.record_success(&ctx.user_id);
                }
                return RunOutput::Complete {
                    text: run_text,
                    tools_used: run_tools,
                    usage,
                };
            }

            session.push_assistant_blocks(response.content.clone());
            session.push_tool_results(results);
            run_tools.extend(iter_tools);
        }
    }

    /// Execute a previously confirmed write tool.
    ///
    /// Called from outside the loop once the pending action has been
    /// claimed; the action id doubles as confirmation id and request id.
    pub async fn execute_confirmed(&self, action: &PendingAction) -> Result<ToolOutput> {
        let tool = self
            .registry
            .get(&action.tool_name)
            .ok_or_else(|| Error::Protocol(format!("unknown tool: {}", action.tool_name)))?;

        let started = Instant::now();
        let invocation = ToolInvocation {
            user_id: action.user_id.clone(),
            input: action.params.clone(),
            confirmation_id: Some(action.id.clone()),
            request_id: action.id.clone(),
        };
        let result = tool.execute(invocation).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (output, error) = match &result {
            Ok(out) if out.success => (out.data.to_string(), None),
            Ok(out) => (
                Value::Null.to_string(),
                Some(out.error.clone().unwrap_or_else(|| "tool failed".into())),
            ),
            Err(e) => (Value::Null.to_string(), Some(e.to_string())),
        };
        if let Some(audit) = &self.audit {
            audit.log(AuditEntry {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: action.user_id.clone(),
                session_id: action.session_id.clone(),
                request_id: action.id.clone(),
                parent_id: None,
                agent: "main".into(),
                tool: action.tool_name.clone(),
                input: action.params.to_string(),
                output,
                error,
                duration_ms,
                is_write: true,
                timestamp: Utc::now(),
            });
        }
        result
    }

    // ── Private ──────────────────────────────────────────────────────

    async fn call_model(
        &self,
        request: &CompletionRequest,
        sink: Option<&dyn StreamSink>,
        deadline: Option<tokio::time::Instant>,
        cancel: &CancelToken,
    ) -> Result<CompletionResponse> {
        let call = async {
            match sink {
                Some(sink) => {
                    let mut stream = self.provider.complete_stream(request).await?;
                    while let Some(event) = stream.next().await {
                        if cancel.is_cancelled() {
                            return Err(Error::Cancelled("run cancelled".into()));
                        }
                        match event? {
                            StreamEvent::Delta { text } => sink.emit(&text, false),
                            StreamEvent::Completed { response } => return Ok(response),
                        }
                    }
                    Err(Error::Provider(
                        "stream ended without a terminal event".into(),
                    ))
                }
                None => self.provider.complete(request).await,
            }
        };
        match deadline {
            Some(at) => tokio::time::timeout_at(at, call)
                .await
                .map_err(|_| Error::BudgetExceeded("timed out".into()))?,
            None => call.await,
        }
    }

    /// Build (or reuse, within the idempotency bucket) the pending action
    /// for a confirmation-gated tool and persist it.
    async fn materialize_pending(
        &self,
        ctx: &RequestContext,
        tool_use_id: &str,
        tool: &dyn Tool,
        params: &Value,
    ) -> Result<PendingAction> {
        let key = idempotency::key(
            &ctx.user_id,
            tool.name(),
            params,
            Utc::now(),
            self.config.idempotency_bucket_seconds,
        );
        if let Some(existing) = self.pending.get_by_idempotency(&ctx.user_id, &key).await? {
            tracing::debug!(
                action_id = %existing.id,
                "duplicate request within idempotency bucket; reusing pending action"
            );
            return Ok(existing);
        }

        let summary = self.registry.summarize(tool, params);
        let mut action = PendingAction::new(
            ctx.user_id.as_str(),
            ctx.session_id.as_str(),
            tool_use_id,
            tool.name(),
            params.clone(),
            summary,
            key,
        );
        action.expires_at =
            action.created_at + chrono::Duration::seconds(self.config.pending_ttl_seconds);
        self.pending.store(action.clone()).await?;
        Ok(action)
    }

    async fn execute_read_tool(
        &self,
        ctx: &RequestContext,
        tool_use_id: &str,
        tool: &dyn Tool,
        params: &Value,
        deadline: Option<tokio::time::Instant>,
    ) -> ToolExecution {
        let started = Instant::now();
        let invocation = ToolInvocation {
            user_id: ctx.user_id.clone(),
            input: params.clone(),
            confirmation_id: None,
            request_id: ctx.request_id.clone(),
        };

        let call = tool.execute(invocation);
        let result = match deadline {
            Some(at) => match tokio::time::timeout_at(at, call).await {
                Ok(result) => result,
                Err(_) => Err(Error::BudgetExceeded("timed out".into())),
            },
            None => call.await,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let (output, is_error, error) = match &result {
            Ok(out) if out.success => (out.data.to_string(), false, None),
            Ok(out) => {
                let message = out.error.clone().unwrap_or_else(|| "tool failed".into());
                (format!("error: {message}"), true, Some(message))
            }
            Err(e) => (format!("error: {e}"), true, Some(e.to_string())),
        };

        tracing::debug!(
            tool = %tool.name(),
            duration_ms,
            is_error,
            "tool executed"
        );
        if let Some(audit) = &self.audit {
            audit.log(AuditEntry {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: ctx.user_id.clone(),
                session_id: ctx.session_id.clone(),
                request_id: ctx.request_id.clone(),
                parent_id: ctx.audit_parent_id.clone(),
                agent: ctx.agent_name.clone(),
                tool: tool.name().into(),
                input: params.to_string(),
                output: output.clone(),
                error,
                duration_ms,
                is_write: false,
                timestamp: Utc::now(),
            });
        }

        ToolExecution {
            tool_use_id: tool_use_id.into(),
            tool: tool.name().into(),
            input: params.clone(),
            output,
            is_error,
            duration_ms,
        }
    }
}
