use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default lifetime of a pending action awaiting user decision.
pub const DEFAULT_PENDING_TTL_SECONDS: i64 = 600;

/// A write tool invocation suspended awaiting user decision.
///
/// Created by the engine when the model requests a confirmation-gated
/// tool; stored until the user confirms, cancels, or the TTL evicts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Opaque, collision-resistant action id.
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    /// Block id of the originating tool_use, used to reattach the result.
    pub tool_use_id: String,
    pub tool_name: String,
    /// Canonicalized parameter JSON as issued by the model.
    pub params: serde_json::Value,
    /// Human-readable summary shown in the confirmation prompt.
    pub summary: String,
    /// Deterministic digest collapsing duplicate requests within a bucket.
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingAction {
    /// Build a fresh action expiring after the default TTL.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        params: serde_json::Value,
        summary: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            tool_use_id: tool_use_id.into(),
            tool_name: tool_name.into(),
            params,
            summary: summary.into(),
            idempotency_key: idempotency_key.into(),
            created_at: now,
            expires_at: now + Duration::seconds(DEFAULT_PENDING_TTL_SECONDS),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
