//! Deterministic scripted provider for tests.
//!
//! Each call to `complete`/`complete_stream` pops the next response from
//! the front of the script queue, so tests can specify exact block
//! sequences — including tool calls — without network access.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::stream;
use parking_lot::Mutex;

use teller_domain::message::ContentBlock;
use teller_domain::usage::TokenUsage;
use teller_domain::{Error, Result};

use crate::{BoxStream, CompletionRequest, CompletionResponse, ModelProvider, StreamEvent};

pub struct ScriptedProvider {
    responses: Mutex<VecDeque<CompletionResponse>>,
    calls: AtomicUsize,
    /// The last request seen, so tests can inspect projected tools and
    /// message shapes.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Shorthand: a single text-only response with the given usage.
    pub fn text_response(text: &str, input_tokens: u32, output_tokens: u32) -> CompletionResponse {
        CompletionResponse {
            content: vec![ContentBlock::text(text)],
            usage: TokenUsage::new(input_tokens, output_tokens),
            stop_reason: Some("end_turn".into()),
            model: "scripted".into(),
        }
    }

    /// Shorthand: a response with arbitrary blocks and the given usage.
    pub fn blocks_response(
        blocks: Vec<ContentBlock>,
        input_tokens: u32,
        output_tokens: u32,
    ) -> CompletionResponse {
        CompletionResponse {
            content: blocks,
            usage: TokenUsage::new(input_tokens, output_tokens),
            stop_reason: Some("tool_use".into()),
            model: "scripted".into(),
        }
    }

    /// Number of completed calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn pop(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        *self.last_request.lock() = Some(req.clone());
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Provider("script exhausted".into()))
    }
}

#[async_trait::async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        self.pop(req)
    }

    async fn complete_stream(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let response = self.pop(req)?;
        let mut events: Vec<Result<StreamEvent>> = Vec::new();
        for block in &response.content {
            if let ContentBlock::Text { text } = block {
                events.push(Ok(StreamEvent::Delta { text: text.clone() }));
            }
        }
        events.push(Ok(StreamEvent::Completed { response }));
        Ok(Box::pin(stream::iter(events)))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

/// A provider whose every call fails at the transport layer.
pub struct FailingProvider {
    pub message: String,
}

#[async_trait::async_trait]
impl ModelProvider for FailingProvider {
    async fn complete(&self, _req: &CompletionRequest) -> Result<CompletionResponse> {
        Err(Error::Provider(self.message.clone()))
    }

    async fn complete_stream(
        &self,
        _req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        Err(Error::Provider(self.message.clone()))
    }

    fn provider_id(&self) -> &str {
        "failing"
    }
}
