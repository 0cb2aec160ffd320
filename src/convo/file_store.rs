//! Directory-of-JSON conversation store.
//!
//! One `<conversationId>.json` file per conversation, written atomically.
//! With a cipher configured, file bodies are `hex(iv):hex(ciphertext)` of
//! the JSON document; without one they are plain JSON. The two modes never
//! mix: an encrypted store refuses plaintext files rather than silently
//! accepting them.

use super::{
    apply_patch, past_retention, Conversation, ConversationFilter, ConversationPatch,
    ConversationStats, ConversationStore,
};
use crate::utils::{atomic_write, ensure_dir, safe_filename};
use crate::vault::crypto::SealedBox;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

const MAX_CACHED_CONVERSATIONS: usize = 64;

pub struct FileConversationStore {
    dir: PathBuf,
    cipher: Option<SealedBox>,
    retention_days: u32,
    cache: Mutex<LruCache<String, Conversation>>,
}

impl FileConversationStore {
    pub fn new(dir: impl AsRef<Path>, cipher: Option<SealedBox>, retention_days: u32) -> Result<Self> {
        let dir = ensure_dir(dir)?;
        Ok(Self {
            dir,
            cipher,
            retention_days,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(MAX_CACHED_CONVERSATIONS).expect("cache size floor"),
            )),
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", safe_filename(id)))
    }

    fn encode(&self, conversation: &Conversation) -> Result<String> {
        let json = serde_json::to_string_pretty(conversation)?;
        match &self.cipher {
            Some(cipher) => cipher.seal_text(&json),
            None => Ok(json),
        }
    }

    fn decode(&self, content: &str) -> Result<Conversation> {
        let json = match &self.cipher {
            Some(cipher) => {
                if !content.contains(':') || content.trim_start().starts_with('{') {
                    bail!("store is encrypted but file is not");
                }
                cipher.open_text(content)?
            }
            None => content.to_string(),
        };
        serde_json::from_str(&json).context("conversation JSON is malformed")
    }

    fn load(&self, id: &str) -> Result<Option<Conversation>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read conversation {}", path.display()))?;
        Ok(Some(self.decode(&content)?))
    }

    fn load_all(&self) -> Result<Vec<Conversation>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension() != Some(std::ffi::OsStr::new("json")) {
                continue;
            }
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!("skipping unreadable conversation {}: {}", path.display(), e);
                    continue;
                }
            };
            match self.decode(&content) {
                Ok(conversation) => out.push(conversation),
                Err(e) => warn!("skipping undecodable conversation {}: {}", path.display(), e),
            }
        }
        Ok(out)
    }

    fn write(&self, conversation: &Conversation) -> Result<()> {
        let content = self.encode(conversation)?;
        atomic_write(&self.path_for(&conversation.conversation_id), &content)?;
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .put(conversation.conversation_id.clone(), conversation.clone());
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.write(conversation)
    }

    async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        {
            let mut cache = self
                .cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(conversation) = cache.get(id) {
                return Ok(Some(conversation.clone()));
            }
        }
        let loaded = self.load(id)?;
        if let Some(conversation) = &loaded {
            self.cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .put(id.to_string(), conversation.clone());
        }
        Ok(loaded)
    }

    async fn update(&self, id: &str, patch: ConversationPatch) -> Result<Option<Conversation>> {
        let Some(mut conversation) = self.get(id).await? else {
            return Ok(None);
        };
        apply_patch(&mut conversation, patch);
        self.write(&conversation)?;
        Ok(Some(conversation))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop(id);
        let path = self.path_for(id);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete {}", path.display()))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn list(&self, filter: &ConversationFilter) -> Result<Vec<Conversation>> {
        let mut matching: Vec<Conversation> = self
            .load_all()?
            .into_iter()
            .filter(|c| filter.matches(c))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let out: Vec<Conversation> = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(out)
    }

    async fn stats(&self) -> Result<ConversationStats> {
        let all = self.load_all()?;
        Ok(ConversationStats {
            conversations: all.len(),
            messages: all.iter().map(|c| c.messages.len()).sum(),
            encrypted: self.cipher.is_some(),
        })
    }

    async fn cleanup(&self) -> Result<usize> {
        let now = chrono::Utc::now();
        let mut removed = 0;
        for conversation in self.load_all()? {
            if past_retention(&conversation, self.retention_days, now) {
                if self.delete(&conversation.conversation_id).await? {
                    debug!("retention removed conversation {}", conversation.conversation_id);
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}
