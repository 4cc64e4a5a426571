/// Shared error type used across all Teller crates.
///
/// The variants mirror the failure classes the engine distinguishes:
/// policy denials and exhausted budgets terminate a run, provider errors
/// bubble to the caller, tool errors are recovered into the conversation,
/// and protocol/not-found errors surface at the connection boundary.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Guardrails refused the request; no model call was made.
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// Max turns, max tool calls, or the run timeout was hit.
    #[error("{0}")]
    BudgetExceeded(String),

    /// The model call failed at the transport layer.
    #[error("provider: {0}")]
    Provider(String),

    /// A tool reported failure or panicked. Inside a run this is converted
    /// into an `is_error` tool result; it only escapes as an `Error` from
    /// the confirmed-execution path.
    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    /// Malformed client input, an unknown message type, or a missing
    /// session at the connection boundary.
    #[error("protocol: {0}")]
    Protocol(String),

    /// A store lookup missed: absent, expired, or owned by another user.
    /// Ownership mismatches deliberately collapse into this variant.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error should be reported to guardrails as a provider
    /// failure (feeds the circuit breaker).
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, Error::Provider(_))
    }
}
