//! Wire format — JSON objects in both directions.
//!
//! Client shape: `{type, content?, actionId?, conversationId?}`. Server
//! shape: `{type, content?, actionId?, tool?, summary?, expiresAt?,
//! conversationId?, messages?, tokenUsage?}`. `expiresAt` is RFC 3339.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use teller_domain::message::Message;
use teller_domain::usage::TokenUsage;

/// Messages a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    NewConversation,
    ResumeConversation {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    Message {
        content: String,
    },
    Confirm {
        #[serde(rename = "actionId")]
        action_id: String,
    },
    Cancel {
        #[serde(rename = "actionId")]
        action_id: String,
    },
}

/// Messages the server pushes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConversationStarted {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    ConversationResumed {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        messages: Vec<Message>,
    },
    Text {
        content: String,
    },
    TextChunk {
        content: String,
    },
    ConfirmRequest {
        #[serde(rename = "actionId")]
        action_id: String,
        tool: String,
        summary: String,
        #[serde(rename = "expiresAt")]
        expires_at: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    Complete {
        #[serde(rename = "tokenUsage", skip_serializing_if = "Option::is_none")]
        token_usage: Option<TokenUsage>,
    },
    Error {
        content: String,
    },
}
