//! The Teller engine — the turn-by-turn loop that drives a tool-using
//! model against the registry, enforces per-run budgets, suspends write
//! tools behind user confirmation, and accounts token usage.
//!
//! Entry points: [`Engine::run`] drives one run to a terminal
//! [`RunOutput`]; [`Engine::execute_confirmed`] executes a write the user
//! has approved.

pub mod audit;
pub mod cancel;
pub mod engine;
pub mod guardrails;
pub mod idempotency;
pub mod stream;
pub mod subagent;

pub use cancel::CancelToken;
pub use engine::{Engine, RunInput, RunOutput, ToolExecution};
pub use stream::StreamSink;
