use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Server / transport
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18990
}

fn default_preset() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Sse,
}

/// Requested rendering of tool names on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NameStyleSetting {
    #[default]
    Dotted,
    Camel,
    Snake,
    Underscore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TokenModeSetting {
    TenantOnly,
    UserOnly,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Preset selecting which tools are exposed.
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Explicit allow-list; intersected with the preset when present.
    #[serde(default)]
    pub allow: Option<Vec<String>>,
    /// Tools removed after preset/allow composition.
    #[serde(default)]
    pub deny: Option<Vec<String>>,
    #[serde(default, rename = "nameStyle")]
    pub name_style: NameStyleSetting,
    #[serde(default, rename = "tokenMode")]
    pub token_mode: TokenModeSetting,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Stdio,
            host: default_host(),
            port: default_port(),
            preset: default_preset(),
            allow: None,
            deny: None,
            name_style: NameStyleSetting::Dotted,
            token_mode: TokenModeSetting::Auto,
        }
    }
}

// ---------------------------------------------------------------------------
// Platform (outbound HTTP)
// ---------------------------------------------------------------------------

fn default_base_url() -> String {
    "https://open.platform.example.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_base_url", rename = "baseUrl")]
    pub base_url: String,
    /// Populated from `APP_ID` when unset.
    #[serde(default, rename = "appId")]
    pub app_id: String,
    /// Populated from `APP_SECRET` when unset.
    #[serde(default, rename = "appSecret")]
    pub app_secret: String,
    #[serde(default = "default_timeout_secs", rename = "timeoutSecs")]
    pub timeout_secs: u64,
    /// Additional attempts after the first, for transient failures.
    #[serde(default = "default_max_retries", rename = "maxRetries")]
    pub max_retries: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            app_id: String::new(),
            app_secret: String::new(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("base_url", &self.base_url)
            .field("app_id", &self.app_id)
            .field(
                "app_secret",
                &if self.app_secret.is_empty() {
                    "[empty]"
                } else {
                    "[REDACTED]"
                },
            )
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Rate limiter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSettings {
    pub capacity: u64,
    #[serde(rename = "refillTokens")]
    pub refill_tokens: u64,
    #[serde(rename = "refillIntervalMs")]
    pub refill_interval_ms: u64,
    #[serde(rename = "maxWaitMs")]
    pub max_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tier overrides merged over the built-in read/write/admin/default set.
    #[serde(default)]
    pub tiers: HashMap<String, BucketSettings>,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tiers: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheCategorySettings {
    #[serde(rename = "ttlMs")]
    pub ttl_ms: u64,
    #[serde(rename = "maxEntries")]
    pub max_entries: usize,
    #[serde(rename = "maxBytes")]
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-category overrides of the built-in limits.
    #[serde(default)]
    pub categories: HashMap<String, CacheCategorySettings>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            categories: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

fn default_audit_limit() -> usize {
    1000
}

#[derive(Clone, Serialize, Deserialize)]
pub struct VaultSettings {
    /// 64 hex chars (32 bytes). Derived from `APP_SECRET` when unset.
    #[serde(default, rename = "encryptionKey")]
    pub encryption_key: String,
    #[serde(default = "default_audit_limit", rename = "auditLimit")]
    pub audit_limit: usize,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            encryption_key: String::new(),
            audit_limit: default_audit_limit(),
        }
    }
}

impl std::fmt::Debug for VaultSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSettings")
            .field(
                "encryption_key",
                &if self.encryption_key.is_empty() {
                    "[empty]"
                } else {
                    "[REDACTED]"
                },
            )
            .field("audit_limit", &self.audit_limit)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Task queue
// ---------------------------------------------------------------------------

fn default_max_concurrency() -> usize {
    4
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_queue_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_redis_prefix() -> String {
    "lattice".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackendKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default)]
    pub backend: QueueBackendKind,
    #[serde(default, rename = "redisUrl")]
    pub redis_url: Option<String>,
    #[serde(default = "default_redis_prefix", rename = "redisPrefix")]
    pub redis_prefix: String,
    #[serde(default = "default_max_concurrency", rename = "maxConcurrency")]
    pub max_concurrency: usize,
    #[serde(
        default = "default_visibility_timeout_secs",
        rename = "visibilityTimeoutSecs"
    )]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_queue_max_retries", rename = "maxRetries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms", rename = "baseDelayMs")]
    pub base_delay_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: QueueBackendKind::Memory,
            redis_url: None,
            redis_prefix: default_redis_prefix(),
            max_concurrency: default_max_concurrency(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            max_retries: default_queue_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation store
// ---------------------------------------------------------------------------

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationBackend {
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSettings {
    #[serde(default)]
    pub backend: ConversationBackend,
    /// Storage directory (file backend) or database path parent (sqlite).
    /// Defaults to `<lattice home>/conversations`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Encrypt conversation payloads at rest. Requires the vault encryption
    /// key; refusing to start beats silently writing plaintext.
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default = "default_retention_days", rename = "retentionDays")]
    pub retention_days: u32,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            backend: ConversationBackend::File,
            path: None,
            encrypt: false,
            retention_days: default_retention_days(),
        }
    }
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub limiter: LimiterSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub vault: VaultSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default, rename = "conversations")]
    pub conversations: ConversationSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_deserializes_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server.transport, TransportKind::Stdio);
        assert_eq!(config.server.preset, "default");
        assert_eq!(config.queue.max_concurrency, 4);
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.conversations.retention_days, 30);
        assert!(config.limiter.enabled);
    }

    #[test]
    fn test_partial_config_overrides() {
        let config: Config = serde_json::from_str(
            r#"{
                "server": {"transport": "sse", "port": 9000, "nameStyle": "snake"},
                "queue": {"backend": "redis", "redisUrl": "redis://localhost/0", "maxConcurrency": 8}
            }"#,
        )
        .unwrap();
        assert_eq!(config.server.transport, TransportKind::Sse);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.name_style, NameStyleSetting::Snake);
        assert_eq!(config.queue.backend, QueueBackendKind::Redis);
        assert_eq!(config.queue.max_concurrency, 8);
    }

    #[test]
    fn test_platform_debug_redacts_secret() {
        let platform = PlatformConfig {
            app_secret: "super-secret".to_string(),
            ..Default::default()
        };
        let rendered = format!("{:?}", platform);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_token_mode_names() {
        let config: Config =
            serde_json::from_str(r#"{"server": {"tokenMode": "tenantOnly"}}"#).unwrap();
        assert_eq!(config.server.token_mode, TokenModeSetting::TenantOnly);
    }
}
