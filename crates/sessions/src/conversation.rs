//! Conversation storage seam and the in-memory development backend.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use teller_domain::conversation::Conversation;
use teller_domain::message::Message;
use teller_domain::{Error, Result};

/// Abstract conversation backend.
///
/// Messages are append-only once committed; no transactional guarantees
/// are required across conversations.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create(&self, user_id: &str) -> Result<Conversation>;

    /// Fetch a conversation with its ordered messages.
    async fn get(&self, id: &str) -> Result<Conversation>;

    async fn append(&self, id: &str, message: Message) -> Result<()>;

    async fn set_title(&self, id: &str, title: &str) -> Result<()>;

    /// Most-recently-updated first, truncated to `limit`.
    async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<Conversation>>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-process map-backed store for development and tests.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create(&self, user_id: &str) -> Result<Conversation> {
        let conversation = Conversation::new(user_id);
        self.conversations
            .write()
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn get(&self, id: &str) -> Result<Conversation> {
        self.conversations
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))
    }

    async fn append(&self, id: &str, message: Message) -> Result<()> {
        let mut conversations = self.conversations.write();
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))?;
        conversation.messages.push(message);
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn set_title(&self, id: &str, title: &str) -> Result<()> {
        let mut conversations = self.conversations.write();
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))?;
        conversation.title = Some(title.to_string());
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<Conversation>> {
        let mut owned: Vec<Conversation> = self
            .conversations
            .read()
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        owned.truncate(limit);
        Ok(owned)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.conversations
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))
    }
}
