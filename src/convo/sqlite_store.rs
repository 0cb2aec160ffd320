//! SQLite-backed conversation store.
//!
//! Single `conversations` table with the message and metadata payloads as
//! JSON blobs (optionally AEAD-encrypted) and indexed scalar columns for
//! filtering. Timestamps are stored as RFC 3339 text and parsed back into
//! typed values on every read.

use super::{
    apply_patch, past_retention, Conversation, ConversationFilter, ConversationPatch,
    ConversationStats, ConversationStore,
};
use crate::vault::crypto::SealedBox;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct SqliteConversationStore {
    db_path: PathBuf,
    cipher: Option<SealedBox>,
    retention_days: u32,
}

impl SqliteConversationStore {
    pub fn new(
        db_path: impl AsRef<Path>,
        cipher: Option<SealedBox>,
        retention_days: u32,
    ) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
            cipher,
            retention_days,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=3000;",
        )?;
        Ok(conn)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                conversationId TEXT PRIMARY KEY,
                userId TEXT,
                chatId TEXT NOT NULL,
                agentName TEXT NOT NULL,
                messagesBlob TEXT NOT NULL,
                metadataBlob TEXT NOT NULL,
                createdAt TEXT NOT NULL,
                updatedAt TEXT NOT NULL,
                expiresAt TEXT,
                messageCount INTEGER NOT NULL
            )",
            [],
        )?;
        for (name, column) in [
            ("idx_conversations_user", "userId"),
            ("idx_conversations_chat", "chatId"),
            ("idx_conversations_agent", "agentName"),
            ("idx_conversations_created", "createdAt"),
            ("idx_conversations_expires", "expiresAt"),
        ] {
            conn.execute(
                &format!("CREATE INDEX IF NOT EXISTS {} ON conversations ({})", name, column),
                [],
            )?;
        }
        Ok(())
    }

    fn encode_blob(&self, json: &str) -> Result<String> {
        match &self.cipher {
            Some(cipher) => cipher.seal_text(json),
            None => Ok(json.to_string()),
        }
    }

    fn decode_blob(&self, blob: &str) -> Result<String> {
        match &self.cipher {
            Some(cipher) => cipher.open_text(blob),
            None => Ok(blob.to_string()),
        }
    }

    fn row_to_conversation(&self, row: &rusqlite::Row<'_>) -> Result<Conversation> {
        let messages_blob: String = row.get("messagesBlob")?;
        let metadata_blob: String = row.get("metadataBlob")?;
        let created_at: String = row.get("createdAt")?;
        let updated_at: String = row.get("updatedAt")?;
        let expires_at: Option<String> = row.get("expiresAt")?;

        Ok(Conversation {
            conversation_id: row.get("conversationId")?,
            user_id: row.get("userId")?,
            chat_id: row.get("chatId")?,
            agent_name: row.get("agentName")?,
            messages: serde_json::from_str(&self.decode_blob(&messages_blob)?)?,
            metadata: serde_json::from_str(&self.decode_blob(&metadata_blob)?)?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
            expires_at: expires_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }

    fn upsert(&self, conversation: &Conversation) -> Result<()> {
        let conn = self.connect()?;
        let messages = self.encode_blob(&serde_json::to_string(&conversation.messages)?)?;
        let metadata = self.encode_blob(&serde_json::to_string(&conversation.metadata)?)?;
        conn.execute(
            "INSERT INTO conversations
                (conversationId, userId, chatId, agentName, messagesBlob, metadataBlob,
                 createdAt, updatedAt, expiresAt, messageCount)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(conversationId) DO UPDATE SET
                userId = excluded.userId,
                chatId = excluded.chatId,
                agentName = excluded.agentName,
                messagesBlob = excluded.messagesBlob,
                metadataBlob = excluded.metadataBlob,
                updatedAt = excluded.updatedAt,
                expiresAt = excluded.expiresAt,
                messageCount = excluded.messageCount",
            params![
                conversation.conversation_id,
                conversation.user_id,
                conversation.chat_id,
                conversation.agent_name,
                messages,
                metadata,
                conversation.created_at.to_rfc3339(),
                conversation.updated_at.to_rfc3339(),
                conversation.expires_at.map(|t| t.to_rfc3339()),
                conversation.messages.len() as i64,
            ],
        )?;
        Ok(())
    }

    fn fetch(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM conversations WHERE conversationId = ?1")?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(self.row_to_conversation(row)?)),
            None => Ok(None),
        }
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow!("bad timestamp '{}': {}", raw, e))
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.upsert(conversation)
    }

    async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        self.fetch(id)
    }

    async fn update(&self, id: &str, patch: ConversationPatch) -> Result<Option<Conversation>> {
        let Some(mut conversation) = self.fetch(id)? else {
            return Ok(None);
        };
        apply_patch(&mut conversation, patch);
        self.upsert(&conversation)?;
        Ok(Some(conversation))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let n = conn.execute("DELETE FROM conversations WHERE conversationId = ?1", [id])?;
        Ok(n > 0)
    }

    async fn list(&self, filter: &ConversationFilter) -> Result<Vec<Conversation>> {
        let conn = self.connect()?;

        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(user_id) = &filter.user_id {
            clauses.push(format!("userId = ?{}", args.len() + 1));
            args.push(user_id.clone());
        }
        if let Some(chat_id) = &filter.chat_id {
            clauses.push(format!("chatId = ?{}", args.len() + 1));
            args.push(chat_id.clone());
        }
        if let Some(agent_name) = &filter.agent_name {
            clauses.push(format!("agentName = ?{}", args.len() + 1));
            args.push(agent_name.clone());
        }
        if let Some(from) = filter.from {
            clauses.push(format!("createdAt >= ?{}", args.len() + 1));
            args.push(from.to_rfc3339());
        }
        if let Some(to) = filter.to {
            clauses.push(format!("createdAt <= ?{}", args.len() + 1));
            args.push(to.to_rfc3339());
        }

        let mut sql = String::from("SELECT * FROM conversations");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY createdAt DESC");
        sql.push_str(&format!(
            " LIMIT {} OFFSET {}",
            filter.limit.map_or(-1, |n| n as i64),
            filter.offset
        ));

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(self.row_to_conversation(row)?);
        }
        Ok(out)
    }

    async fn stats(&self) -> Result<ConversationStats> {
        let conn = self.connect()?;
        let (conversations, messages): (i64, Option<i64>) = conn
            .query_row(
                "SELECT COUNT(*), SUM(messageCount) FROM conversations",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("stats query failed")?;
        Ok(ConversationStats {
            conversations: conversations as usize,
            messages: messages.unwrap_or(0) as usize,
            encrypted: self.cipher.is_some(),
        })
    }

    async fn cleanup(&self) -> Result<usize> {
        let now = Utc::now();
        // Load-and-check instead of raw SQL date math: the retention rule
        // (earlier of expiry and retention window) lives in one place.
        let all = self.list(&ConversationFilter::default()).await?;
        let mut removed = 0;
        for conversation in all {
            if past_retention(&conversation, self.retention_days, now)
                && self.delete(&conversation.conversation_id).await?
            {
                debug!("retention removed conversation {}", conversation.conversation_id);
                removed += 1;
            }
        }
        Ok(removed)
    }
}
