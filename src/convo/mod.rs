//! Agent conversation persistence with optional at-rest encryption and
//! retention.

pub mod file_store;
pub mod sqlite_store;

pub use file_store::FileConversationStore;
pub use sqlite_store::SqliteConversationStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, rename = "toolCalls", skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
}

impl ConversationMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRecord>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(rename = "chatId")]
    pub chat_id: String,
    #[serde(rename = "agentName")]
    pub agent_name: String,
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none", default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn new(chat_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: Uuid::new_v4().to_string(),
            user_id: None,
            chat_id: chat_id.into(),
            agent_name: agent_name.into(),
            messages: Vec::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Messages are append-only; ordering is exactly the append order.
    pub fn append_message(&mut self, message: ConversationMessage) {
        self.messages.push(message);
        self.updated_at = Utc::now().max(self.created_at);
    }
}

/// Partial update applied by [`ConversationStore::update`]. Messages can
/// only be appended, never reordered or removed.
#[derive(Debug, Clone, Default)]
pub struct ConversationPatch {
    pub append_messages: Vec<ConversationMessage>,
    pub merge_metadata: HashMap<String, Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// AND-combined listing filter.
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub user_id: Option<String>,
    pub chat_id: Option<String>,
    pub agent_name: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ConversationFilter {
    pub fn matches(&self, conversation: &Conversation) -> bool {
        if let Some(user_id) = &self.user_id {
            if conversation.user_id.as_ref() != Some(user_id) {
                return false;
            }
        }
        if let Some(chat_id) = &self.chat_id {
            if &conversation.chat_id != chat_id {
                return false;
            }
        }
        if let Some(agent_name) = &self.agent_name {
            if &conversation.agent_name != agent_name {
                return false;
            }
        }
        if let Some(from) = self.from {
            if conversation.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if conversation.created_at > to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationStats {
    pub conversations: usize,
    pub messages: usize,
    pub encrypted: bool,
}

/// Whether a conversation is past retention at `now`: the earlier of its
/// explicit expiry and the retention window since its last update wins.
pub(crate) fn past_retention(
    conversation: &Conversation,
    retention_days: u32,
    now: DateTime<Utc>,
) -> bool {
    let retention_deadline =
        conversation.updated_at + ChronoDuration::days(i64::from(retention_days));
    let deadline = match conversation.expires_at {
        Some(expires_at) => expires_at.min(retention_deadline),
        None => retention_deadline,
    };
    deadline <= now
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save(&self, conversation: &Conversation) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Conversation>>;

    /// Apply a patch; returns the updated record, or `None` when absent.
    async fn update(&self, id: &str, patch: ConversationPatch) -> Result<Option<Conversation>>;

    async fn delete(&self, id: &str) -> Result<bool>;

    /// Newest-first listing under the filter.
    async fn list(&self, filter: &ConversationFilter) -> Result<Vec<Conversation>>;

    async fn stats(&self) -> Result<ConversationStats>;

    /// Remove retention-expired conversations; returns how many went.
    async fn cleanup(&self) -> Result<usize>;
}

pub(crate) fn apply_patch(conversation: &mut Conversation, patch: ConversationPatch) {
    for message in patch.append_messages {
        conversation.messages.push(message);
    }
    for (key, value) in patch.merge_metadata {
        conversation.metadata.insert(key, value);
    }
    if let Some(expires_at) = patch.expires_at {
        conversation.expires_at = Some(expires_at);
    }
    conversation.updated_at = Utc::now().max(conversation.created_at);
}
