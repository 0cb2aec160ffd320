//! Request dispatch: wire-name resolution, credential gating and guarded
//! handler execution.

use crate::client::PlatformClient;
use crate::errors::{LatticeError, LatticeResult};
use crate::registry::casing::{self, NameStyle};
use crate::registry::preset::{self, Preset, TokenMode, ToolPolicy};
use crate::registry::{Envelope, HandlerContext, ToolDescriptor, ToolRegistry};
use crate::vault::{TokenKind, TokenVault};
use futures_util::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One row of `tools/list` output: the wire name plus descriptor fields.
#[derive(Debug, Clone)]
pub struct ToolListing {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

pub struct Dispatcher {
    registry: ToolRegistry,
    presets: Vec<Preset>,
    policy: ToolPolicy,
    style: NameStyle,
    client: Arc<PlatformClient>,
    vault: Arc<TokenVault>,
    /// Active descriptors in preset order.
    active: Vec<Arc<ToolDescriptor>>,
    /// Rendered wire name → canonical name, for the active style.
    wire_names: HashMap<String, String>,
    /// Memoised policy resolutions, keyed by [`ToolPolicy::cache_key`].
    resolve_cache: Mutex<HashMap<String, Arc<Vec<String>>>>,
}

impl Dispatcher {
    /// Resolve the policy against the registry and build the wire-name
    /// table. Fails fast on impossible configurations: an empty tool set or
    /// two tools whose names collide under the requested style.
    pub fn new(
        registry: ToolRegistry,
        presets: Vec<Preset>,
        policy: ToolPolicy,
        style: NameStyle,
        client: Arc<PlatformClient>,
        vault: Arc<TokenVault>,
    ) -> LatticeResult<Self> {
        let active = preset::resolve(&registry, &presets, &policy);
        if active.is_empty() {
            return Err(LatticeError::Misconfigured(format!(
                "policy resolves to an empty tool set (preset: {:?})",
                policy.preset
            )));
        }

        let mut wire_names = HashMap::with_capacity(active.len());
        for descriptor in &active {
            let rendered = casing::render(&descriptor.name, style)?;
            if let Some(existing) = wire_names.insert(rendered.clone(), descriptor.name.clone()) {
                return Err(LatticeError::InvalidName(format!(
                    "'{}' and '{}' both render as '{}'",
                    existing, descriptor.name, rendered
                )));
            }
        }

        info!(
            "dispatcher ready: {} tools exposed (style {:?}, mode {:?})",
            active.len(),
            style,
            policy.token_mode
        );

        Ok(Self {
            registry,
            presets,
            policy,
            style,
            client,
            vault,
            active,
            wire_names,
            resolve_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Ordered tool listings for the active policy, rendered in the active
    /// style.
    pub fn list_tools(&self) -> Vec<ToolListing> {
        self.active
            .iter()
            .filter_map(|descriptor| {
                casing::render(&descriptor.name, self.style)
                    .ok()
                    .map(|name| ToolListing {
                        name,
                        description: descriptor.description.clone(),
                        input_schema: descriptor.input_schema.clone(),
                    })
            })
            .collect()
    }

    /// Resolve an arbitrary policy to canonical names, memoised per policy.
    pub fn resolve_policy(&self, policy: &ToolPolicy) -> Arc<Vec<String>> {
        let key = policy.cache_key();
        {
            let cache = self
                .resolve_cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(resolved) = cache.get(&key) {
                return resolved.clone();
            }
        }
        let resolved: Arc<Vec<String>> = Arc::new(
            preset::resolve(&self.registry, &self.presets, policy)
                .iter()
                .map(|d| d.name.clone())
                .collect(),
        );
        self.resolve_cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, resolved.clone());
        resolved
    }

    /// Wire names the transport may offer for completion.
    pub fn wire_names(&self) -> Vec<String> {
        self.active
            .iter()
            .filter_map(|d| casing::render(&d.name, self.style).ok())
            .collect()
    }

    /// Store (or replace) the caller-supplied user credential.
    pub fn set_user_token(&self, token: &str) -> LatticeResult<()> {
        self.vault.store(TokenKind::User, token, None)
    }

    /// The credential kind this invocation will run as.
    fn effective_kind(&self) -> TokenKind {
        match self.policy.token_mode {
            TokenMode::UserOnly => TokenKind::User,
            TokenMode::TenantOnly => TokenKind::Tenant,
            TokenMode::Auto => {
                if self.vault.has(TokenKind::User) {
                    TokenKind::User
                } else {
                    TokenKind::Tenant
                }
            }
        }
    }

    fn fetch_token(&self, kind: TokenKind) -> LatticeResult<Option<String>> {
        match kind {
            TokenKind::User => self.vault.retrieve(TokenKind::User),
            // Tenant-level calls fall back to the app credential; the
            // platform treats it as the tenant's own identity.
            TokenKind::Tenant => match self.vault.retrieve(TokenKind::Tenant)? {
                Some(token) => Ok(Some(token)),
                None => self.vault.retrieve(TokenKind::App),
            },
            TokenKind::App => self.vault.retrieve(TokenKind::App),
        }
    }

    /// Translate `(wire name, params)` into one guarded handler invocation.
    ///
    /// Client-caused dispatch failures (unknown tool, missing credential)
    /// surface as `Err`; anything that goes wrong inside the handler,
    /// panics included, is captured into an error envelope.
    pub async fn invoke(&self, wire_name: &str, params: Value) -> LatticeResult<Envelope> {
        casing::validate_wire_name(wire_name)?;

        let canonical = self
            .wire_names
            .get(wire_name)
            .ok_or_else(|| LatticeError::ToolNotFound(wire_name.to_string()))?;
        let descriptor = self
            .registry
            .get(canonical)
            .ok_or_else(|| LatticeError::ToolNotFound(wire_name.to_string()))?;

        let kind = self.effective_kind();
        if !descriptor.accepts(kind) {
            // Blocked at dispatch; the handler never sees the request.
            return Err(LatticeError::AuthUnavailable {
                tool: descriptor.name.clone(),
                kind: kind.as_str().to_string(),
            });
        }

        let token = self.fetch_token(kind)?;
        if token.is_none() && !descriptor.required_tokens.is_empty() {
            return Err(LatticeError::AuthUnavailable {
                tool: descriptor.name.clone(),
                kind: kind.as_str().to_string(),
            });
        }

        let request_id = Uuid::new_v4();
        let started = Instant::now();
        debug!(
            "invoke {}: tool={} kind={}",
            request_id, descriptor.name, kind
        );

        let ctx = HandlerContext {
            token: token.as_deref(),
            token_kind: kind,
            descriptor: &descriptor,
        };

        let outcome = std::panic::AssertUnwindSafe(descriptor.handler.call(
            &self.client,
            params,
            &ctx,
        ))
        .catch_unwind()
        .await;

        let envelope = match outcome {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(err)) => {
                warn!("invoke {}: tool '{}' failed: {}", request_id, descriptor.name, err);
                Envelope::error(format!("Tool '{}' failed: {}", descriptor.name, err))
            }
            Err(_) => {
                warn!("invoke {}: tool '{}' panicked", request_id, descriptor.name);
                Envelope::error(format!(
                    "Tool '{}' crashed unexpectedly",
                    descriptor.name
                ))
            }
        };

        info!(
            "invoke {}: tool={} done in {}ms (error: {})",
            request_id,
            descriptor.name,
            started.elapsed().as_millis(),
            envelope.is_error
        );
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests;
