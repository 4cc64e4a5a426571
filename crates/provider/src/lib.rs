//! Provider-facing types and the [`ModelProvider`] trait.
//!
//! The underlying large-language-model service is an external collaborator;
//! this crate defines the seam the engine drives it through, in both unary
//! and streaming form, plus a deterministic scripted provider for tests.

pub mod scripted;

use std::pin::Pin;

use serde::{Deserialize, Serialize};

use teller_domain::message::{ContentBlock, Message};
use teller_domain::usage::TokenUsage;
use teller_domain::Result;

/// A boxed async stream, used for streaming model responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool definition projected to the model API.
///
/// `input_schema` is a JSON-schema object (`type: "object"` with a
/// `properties` mapping and optional `required` list), forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One model invocation: messages, system prompt, and projected tools.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: u32,
}

/// The model's reply: ordered content blocks plus token accounting.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: Vec<ContentBlock>,
    pub usage: TokenUsage,
    pub stop_reason: Option<String>,
    pub model: String,
}

/// Events emitted while a completion streams.
///
/// Text arrives as deltas; the terminal event carries the fully assembled
/// response (including any tool_use blocks and the usage totals).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Delta { text: String },
    Completed { response: CompletionResponse },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every model adapter implements.
///
/// Implementations translate between these types and the wire format of a
/// concrete provider. Transport failures surface as `Error::Provider`.
#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    /// Send a completion request and wait for the full response.
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse>;

    /// Send a completion request and return a stream of events, ending in
    /// exactly one [`StreamEvent::Completed`].
    async fn complete_stream(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
