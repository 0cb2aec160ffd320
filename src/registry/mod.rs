//! Tool registry: immutable descriptors, presets and the dispatch surface.

pub mod casing;
pub mod catalog;
pub mod dispatcher;
pub mod preset;

pub use casing::NameStyle;
pub use dispatcher::Dispatcher;
pub use preset::{Preset, TokenMode, ToolPolicy};

use crate::client::PlatformClient;
use crate::vault::TokenKind;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// The canonical return shape of a tool handler.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

impl Envelope {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: true,
        }
    }
}

/// Per-invocation context handed to a handler alongside the raw parameters.
pub struct HandlerContext<'a> {
    /// Resolved credential for this invocation, already fetched from the
    /// vault. Handlers must not retain it.
    pub token: Option<&'a str>,
    /// Which credential kind `token` is.
    pub token_kind: TokenKind,
    pub descriptor: &'a ToolDescriptor,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        client: &PlatformClient,
        params: Value,
        ctx: &HandlerContext<'_>,
    ) -> anyhow::Result<Envelope>;
}

/// Immutable description of one tool. Created at registry build time and
/// never mutated afterwards.
pub struct ToolDescriptor {
    /// Canonical dotted name, e.g. `im.message.create`.
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped input description.
    pub input_schema: Value,
    /// Which credential kinds the tool can be invoked with. Subset of
    /// `{tenant, user}`; empty means either.
    pub required_tokens: Vec<TokenKind>,
    /// Project tag grouping related endpoints (e.g. `im`, `calendar`).
    pub project: String,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    /// Whether the tool may be invoked with the given credential kind.
    pub fn accepts(&self, kind: TokenKind) -> bool {
        self.required_tokens.is_empty() || self.required_tokens.contains(&kind)
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("project", &self.project)
            .field("required_tokens", &self.required_tokens)
            .finish()
    }
}

/// Registration-ordered collection of tool descriptors. The registry owns
/// every descriptor for the process lifetime; callers get shared references.
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<ToolDescriptor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) {
        let name = descriptor.name.clone();
        if self.tools.contains_key(&name) {
            warn!("tool registry: overwriting duplicate tool '{}'", name);
        }
        self.tools.insert(name, Arc::new(descriptor));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        self.tools.get(name).cloned()
    }

    /// Canonical names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ToolDescriptor>> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
