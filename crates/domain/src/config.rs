use serde::{Deserialize, Serialize};

/// Engine defaults applied when a run does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model id passed to the provider when the run does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Max output tokens per model call when the run does not name one.
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,
    /// Lifetime of a pending action awaiting confirmation, in seconds.
    #[serde(default = "default_pending_ttl")]
    pub pending_ttl_seconds: i64,
    /// Width of the idempotency deduplication window, in seconds.
    #[serde(default = "default_idempotency_bucket")]
    pub idempotency_bucket_seconds: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            default_max_tokens: default_max_tokens(),
            default_system_prompt: default_system_prompt(),
            pending_ttl_seconds: default_pending_ttl(),
            idempotency_bucket_seconds: default_idempotency_bucket(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}
fn default_pending_ttl() -> i64 {
    600
}
fn default_idempotency_bucket() -> i64 {
    600
}

/// Rate-limit and circuit-breaker settings for the windowed guardrails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Requests allowed per user per window.
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Consecutive provider failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long an open circuit rejects requests before probing again.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_seconds: default_window_seconds(),
            failure_threshold: default_failure_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

fn default_requests_per_window() -> u32 {
    30
}
fn default_window_seconds() -> u64 {
    60
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_seconds() -> u64 {
    30
}

/// Gateway server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Forward text deltas as `text_chunk` messages while a run streams.
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    /// Sweep interval for expired pending actions, in seconds.
    #[serde(default = "default_sweep_seconds")]
    pub pending_sweep_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            streaming: default_streaming(),
            pending_sweep_seconds: default_sweep_seconds(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_streaming() -> bool {
    true
}
fn default_sweep_seconds() -> u64 {
    60
}
