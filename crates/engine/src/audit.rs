//! Audit interface — one record per tool invocation.
//!
//! Sinks may write asynchronously; `log` must not block the turn loop.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// One tool-invocation record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub request_id: String,
    /// Request id of the spawning run, for delegation chains.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub agent: String,
    pub tool: String,
    /// Serialized tool input.
    pub input: String,
    /// Serialized tool output (or the rendered error).
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub is_write: bool,
    pub timestamp: DateTime<Utc>,
}

pub trait AuditSink: Send + Sync {
    fn log(&self, entry: AuditEntry);
}

/// Emits each entry as a structured tracing event.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log(&self, entry: AuditEntry) {
        tracing::info!(
            target: "teller::audit",
            id = %entry.id,
            user_id = %entry.user_id,
            session_id = %entry.session_id,
            request_id = %entry.request_id,
            parent_id = entry.parent_id.as_deref().unwrap_or(""),
            agent = %entry.agent,
            tool = %entry.tool,
            duration_ms = entry.duration_ms,
            is_write = entry.is_write,
            error = entry.error.as_deref().unwrap_or(""),
            "tool invocation"
        );
    }
}

/// Collects entries in memory, for tests and development.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn log(&self, entry: AuditEntry) {
        self.entries.lock().push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tool: &str) -> AuditEntry {
        AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".into(),
            session_id: "s1".into(),
            request_id: "r1".into(),
            parent_id: None,
            agent: "main".into(),
            tool: tool.into(),
            input: "{}".into(),
            output: r#"{"amount":"100"}"#.into(),
            error: None,
            duration_ms: 3,
            is_write: false,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemoryAuditSink::new();
        sink.log(entry("get_balance"));
        sink.log(entry("get_profile"));

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tool, "get_balance");
        assert_eq!(entries[1].tool, "get_profile");
    }
}
