//! One logical in-flight conversation in provider-facing form.

use teller_domain::conversation::Conversation;
use teller_domain::message::{ContentBlock, Message, MessageContent, Role, NO_OUTPUT};

/// Transient per-connection conversation state.
///
/// The session does not persist itself; the connection layer drives the
/// conversation store after terminal events.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub conversation_id: String,
    messages: Vec<Message>,
    turn_count: u32,
}

impl Session {
    pub fn new(user_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            messages: Vec::new(),
            turn_count: 0,
        }
    }

    /// Rebuild a session from a stored conversation.
    ///
    /// Stored messages are translated to provider form: tool_use inputs
    /// persisted as raw text are re-parsed (and forwarded as-is when the
    /// text is not valid JSON), and empty tool_result content is
    /// normalized to a non-empty placeholder.
    pub fn restore(conversation: &Conversation) -> Self {
        let messages = conversation
            .messages
            .iter()
            .map(normalize_message)
            .collect();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: conversation.user_id.clone(),
            conversation_id: conversation.id.clone(),
            messages,
            turn_count: 0,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn increment_turn(&mut self) {
        self.turn_count += 1;
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    pub fn push_assistant_text(&mut self, text: impl Into<String>) {
        self.messages.push(Message::assistant(text));
    }

    pub fn push_assistant_blocks(&mut self, blocks: Vec<ContentBlock>) {
        self.messages.push(Message::assistant_blocks(blocks));
    }

    /// Append a group of tool results as one user-role message. Empty
    /// content is normalized so the provider never sees an empty result.
    pub fn push_tool_results(&mut self, results: Vec<ContentBlock>) {
        if results.is_empty() {
            return;
        }
        let normalized = results.into_iter().map(normalize_block).collect();
        self.messages.push(Message::tool_results(normalized));
    }

    /// The id of the first tool_use block that has no matching tool_result
    /// yet, if any. A session with a dangling tool_use is not model-valid
    /// and must not be sent to the provider.
    pub fn unanswered_tool_use(&self) -> Option<&str> {
        let mut answered: Vec<&str> = Vec::new();
        for message in &self.messages {
            for block in message.content.blocks() {
                if let ContentBlock::ToolResult { tool_use_id, .. } = block {
                    answered.push(tool_use_id);
                }
            }
        }
        for message in &self.messages {
            for block in message.content.blocks() {
                if let ContentBlock::ToolUse { id, .. } = block {
                    if !answered.contains(&id.as_str()) {
                        return Some(id);
                    }
                }
            }
        }
        None
    }

    /// Whether a tool_result for the given tool_use id already exists.
    pub fn has_tool_result(&self, tool_use_id: &str) -> bool {
        self.messages.iter().any(|m| {
            m.content.blocks().iter().any(|b| {
                matches!(b, ContentBlock::ToolResult { tool_use_id: id, .. } if id == tool_use_id)
            })
        })
    }
}

fn normalize_message(message: &Message) -> Message {
    match &message.content {
        MessageContent::Text(_) => message.clone(),
        MessageContent::Blocks(blocks) => Message {
            role: message.role,
            content: MessageContent::Blocks(
                blocks.iter().cloned().map(normalize_block).collect(),
            ),
        },
    }
}

fn normalize_block(block: ContentBlock) -> ContentBlock {
    match block {
        ContentBlock::ToolUse { id, name, input } => {
            // Inputs persisted as raw text are re-parsed; unparseable text
            // is forwarded untouched.
            let input = match input {
                serde_json::Value::String(raw) => match serde_json::from_str(&raw) {
                    Ok(parsed) => parsed,
                    Err(_) => serde_json::Value::String(raw),
                },
                other => other,
            };
            ContentBlock::ToolUse { id, name, input }
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentBlock::ToolResult {
            tool_use_id,
            content: if content.is_empty() {
                NO_OUTPUT.to_string()
            } else {
                content
            },
            is_error,
        },
        other => other,
    }
}
