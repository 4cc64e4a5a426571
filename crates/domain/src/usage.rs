use serde::{Deserialize, Serialize};

/// Token usage for one model call, or the accumulated total of a run.
///
/// Serialized in camelCase because this struct goes on the wire verbatim
/// inside `complete` server messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u32>,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        }
    }

    /// Fold another call's usage into this accumulator. Cache counters stay
    /// `None` until a call actually reports one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        if let Some(n) = other.cache_creation_input_tokens {
            *self.cache_creation_input_tokens.get_or_insert(0) += n;
        }
        if let Some(n) = other.cache_read_input_tokens {
            *self.cache_read_input_tokens.get_or_insert(0) += n;
        }
    }
}
