//! Presets and policy resolution.

use crate::config::TokenModeSetting;
use crate::registry::{ToolDescriptor, ToolRegistry};
use crate::vault::TokenKind;
use std::sync::Arc;

/// Named ordered collection of tool names.
#[derive(Debug, Clone)]
pub struct Preset {
    pub name: String,
    pub tools: Vec<String>,
}

impl Preset {
    pub fn new(name: impl Into<String>, tools: Vec<&str>) -> Self {
        Self {
            name: name.into(),
            tools: tools.into_iter().map(str::to_string).collect(),
        }
    }

    /// Disjoint union of several presets: first occurrence wins, order is
    /// stable.
    pub fn compose(presets: &[&Preset]) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for preset in presets {
            for tool in &preset.tools {
                if seen.insert(tool.clone()) {
                    out.push(tool.clone());
                }
            }
        }
        out
    }
}

/// How the dispatcher chooses a credential kind for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenMode {
    TenantOnly,
    UserOnly,
    /// User token when one is available, tenant otherwise.
    Auto,
}

impl From<TokenModeSetting> for TokenMode {
    fn from(setting: TokenModeSetting) -> Self {
        match setting {
            TokenModeSetting::TenantOnly => TokenMode::TenantOnly,
            TokenModeSetting::UserOnly => TokenMode::UserOnly,
            TokenModeSetting::Auto => TokenMode::Auto,
        }
    }
}

impl TokenMode {
    /// Whether a tool with the given requirements can ever run in this mode.
    pub fn compatible(self, descriptor: &ToolDescriptor) -> bool {
        match self {
            TokenMode::TenantOnly => descriptor.accepts(TokenKind::Tenant),
            TokenMode::UserOnly => descriptor.accepts(TokenKind::User),
            TokenMode::Auto => true,
        }
    }
}

/// Which tools a server instance exposes, and under which credential policy.
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    pub preset: Option<String>,
    pub allow: Option<Vec<String>>,
    pub deny: Option<Vec<String>>,
    pub token_mode: TokenMode,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            preset: Some("default".to_string()),
            allow: None,
            deny: None,
            token_mode: TokenMode::Auto,
        }
    }
}

impl ToolPolicy {
    /// Stable memoisation key: two equal policies resolve identically.
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{:?}",
            self.preset.as_deref().unwrap_or("*"),
            self.allow
                .as_ref()
                .map_or_else(|| "*".to_string(), |v| v.join(",")),
            self.deny
                .as_ref()
                .map_or_else(String::new, |v| v.join(",")),
            self.token_mode
        )
    }
}

/// Pure policy resolution: preset universe ∩ allow − deny, minus tools the
/// token mode can never satisfy. Order follows the preset (or registration
/// order when no preset applies).
pub fn resolve(
    registry: &ToolRegistry,
    presets: &[Preset],
    policy: &ToolPolicy,
) -> Vec<Arc<ToolDescriptor>> {
    let universe: Vec<String> = match &policy.preset {
        Some(name) => presets
            .iter()
            .find(|p| &p.name == name)
            .map(|p| p.tools.clone())
            .unwrap_or_default(),
        None => registry.names().into_iter().map(str::to_string).collect(),
    };

    universe
        .into_iter()
        .filter(|name| {
            policy
                .allow
                .as_ref()
                .is_none_or(|allow| allow.iter().any(|a| a == name))
        })
        .filter(|name| {
            policy
                .deny
                .as_ref()
                .is_none_or(|deny| !deny.iter().any(|d| d == name))
        })
        .filter_map(|name| registry.get(&name))
        .filter(|descriptor| policy.token_mode.compatible(descriptor))
        .collect()
}
