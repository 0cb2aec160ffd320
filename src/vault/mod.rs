//! Secure credential store with authenticated encryption, tamper detection
//! and a masked audit trail.
//!
//! Tokens at rest are AES-256-GCM bundles plus an independent keyed checksum
//! of the plaintext. Encrypted bundles may additionally sit in the cache
//! manager's `appTokens` category; evicting a cached bundle never destroys
//! the underlying token. Raw token values never reach logs; only the
//! first-4/last-4 masked form does.

pub mod crypto;

use crate::cache::{CacheCategory, CacheManager};
use crate::errors::{LatticeError, LatticeResult};
use crate::utils::mask_token;
use crypto::SealedBox;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

const MIN_TOKEN_LEN: usize = 8;
const MAX_TOKEN_LEN: usize = 4096;

/// Which credential a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    App,
    User,
    Tenant,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::App => "app",
            TokenKind::User => "user",
            TokenKind::Tenant => "tenant",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Stored,
    Retrieved,
    Expired,
    Invalid,
    Removed,
    Rotated,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Stored => "stored",
            AuditAction::Retrieved => "retrieved",
            AuditAction::Expired => "expired",
            AuditAction::Invalid => "invalid",
            AuditAction::Removed => "removed",
            AuditAction::Rotated => "rotated",
        }
    }
}

/// One audit record. `masked` is the only rendering of the token that ever
/// leaves the vault.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub kind: TokenKind,
    pub action: AuditAction,
    pub masked: String,
}

struct SecureToken {
    bundle: Vec<u8>,
    checksum: String,
    masked: String,
    created_at: DateTime<Utc>,
    last_used: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    rotation_count: u32,
}

/// Per-kind diagnostics exposed by [`TokenVault::status`].
#[derive(Debug, Clone)]
pub struct TokenStatus {
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub rotation_count: u32,
}

#[derive(Debug, Clone)]
pub struct VaultStatus {
    pub encryption_enabled: bool,
    pub tokens: HashMap<TokenKind, TokenStatus>,
    pub audit_entries: usize,
}

/// Exchanges a refresh token for a fresh credential. The platform call is an
/// external collaborator; the vault only owns storage of the result.
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, kind: TokenKind, refresh_token: &str) -> anyhow::Result<String>;
}

pub struct TokenVault {
    sealed: SealedBox,
    mac_key: Vec<u8>,
    tokens: Mutex<HashMap<TokenKind, SecureToken>>,
    audit: Mutex<VecDeque<AuditEvent>>,
    audit_limit: usize,
    cache: Option<Arc<CacheManager>>,
    refresher: Mutex<Option<Arc<dyn TokenRefresher>>>,
}

impl TokenVault {
    /// Build a vault from a secret. Both the AEAD key and the checksum key
    /// are derived from it; an empty secret is a configuration error.
    pub fn new(
        secret: &str,
        audit_limit: usize,
        cache: Option<Arc<CacheManager>>,
    ) -> LatticeResult<Self> {
        let sealed = SealedBox::from_secret(secret)
            .map_err(|e| LatticeError::Misconfigured(format!("vault key: {}", e)))?;
        let mut mac_key = secret.as_bytes().to_vec();
        mac_key.extend_from_slice(b":lattice-checksum");
        Ok(Self {
            sealed,
            mac_key,
            tokens: Mutex::new(HashMap::new()),
            audit: Mutex::new(VecDeque::new()),
            audit_limit: audit_limit.max(1),
            cache,
            refresher: Mutex::new(None),
        })
    }

    pub fn set_refresher(&self, refresher: Arc<dyn TokenRefresher>) {
        *self
            .refresher
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(refresher);
    }

    fn checksum(&self, plaintext: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.mac_key).expect("HMAC accepts any key size");
        mac.update(plaintext.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn record_audit(&self, kind: TokenKind, action: AuditAction, masked: &str) {
        let mut audit = self
            .audit
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if audit.len() >= self.audit_limit {
            audit.pop_front();
        }
        audit.push_back(AuditEvent {
            at: Utc::now(),
            kind,
            action,
            masked: masked.to_string(),
        });
        debug!(
            "vault audit: {} token {} ({})",
            kind.as_str(),
            action.as_str(),
            masked
        );
    }

    fn cache_key(kind: TokenKind) -> String {
        format!("token:{}", kind.as_str())
    }

    fn cache_put(&self, kind: TokenKind, bundle: &[u8]) {
        if let Some(cache) = &self.cache {
            cache.set(
                CacheCategory::AppTokens,
                &Self::cache_key(kind),
                json!(hex::encode(bundle)),
                None,
            );
        }
    }

    fn cache_delete(&self, kind: TokenKind) {
        if let Some(cache) = &self.cache {
            cache.delete(CacheCategory::AppTokens, &Self::cache_key(kind));
        }
    }

    fn cached_bundle(&self, kind: TokenKind) -> Option<Vec<u8>> {
        let cache = self.cache.as_ref()?;
        let value = cache.get(CacheCategory::AppTokens, &Self::cache_key(kind))?;
        hex::decode(value.as_str()?).ok()
    }

    /// Validate and store a credential. The plaintext is encrypted
    /// immediately and not retained.
    pub fn store(
        &self,
        kind: TokenKind,
        token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> LatticeResult<()> {
        validate_token_format(token)?;

        let bundle = self
            .sealed
            .seal(token.as_bytes())
            .map_err(LatticeError::Internal)?;
        let masked = mask_token(token);
        let checksum = self.checksum(token);

        {
            let mut tokens = self
                .tokens
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            // Rotation count survives overwrites of the same kind.
            let rotation_count = tokens.get(&kind).map_or(0, |t| t.rotation_count);
            tokens.insert(
                kind,
                SecureToken {
                    bundle: bundle.clone(),
                    checksum,
                    masked: masked.clone(),
                    created_at: Utc::now(),
                    last_used: None,
                    expires_at,
                    rotation_count,
                },
            );
        }

        self.cache_put(kind, &bundle);
        self.record_audit(kind, AuditAction::Stored, &masked);
        Ok(())
    }

    /// Return the decrypted credential, or `None` when absent, expired or
    /// tampered. Tampered and expired records are destroyed; the audit log
    /// carries the masked detail.
    pub fn retrieve(&self, kind: TokenKind) -> LatticeResult<Option<String>> {
        let (bundle, checksum, masked) = {
            let mut tokens = self
                .tokens
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(record) = tokens.get_mut(&kind) else {
                return Ok(None);
            };

            if let Some(expires_at) = record.expires_at {
                if expires_at <= Utc::now() {
                    let masked = record.masked.clone();
                    tokens.remove(&kind);
                    drop(tokens);
                    self.cache_delete(kind);
                    self.record_audit(kind, AuditAction::Expired, &masked);
                    return Ok(None);
                }
            }

            record.last_used = Some(Utc::now());
            (
                record.bundle.clone(),
                record.checksum.clone(),
                record.masked.clone(),
            )
        };

        // The cached bundle, when present, stands in for the stored one.
        // It is the same ciphertext unless something rewrote it.
        let bundle = self.cached_bundle(kind).unwrap_or(bundle);

        let plaintext = match self.sealed.open(&bundle) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => return self.reject_tampered(kind, &masked),
            },
            Err(_) => return self.reject_tampered(kind, &masked),
        };

        let expected = self.checksum(&plaintext);
        let matches: bool = expected.as_bytes().ct_eq(checksum.as_bytes()).into();
        if !matches {
            return self.reject_tampered(kind, &masked);
        }

        self.record_audit(kind, AuditAction::Retrieved, &masked);
        Ok(Some(plaintext))
    }

    fn reject_tampered(&self, kind: TokenKind, masked: &str) -> LatticeResult<Option<String>> {
        warn!(
            "vault: integrity check failed for {} token, purging",
            kind.as_str()
        );
        self.tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&kind);
        self.cache_delete(kind);
        self.record_audit(kind, AuditAction::Invalid, masked);
        Ok(None)
    }

    /// Presence check without decrypting or touching the audit log. Expired
    /// records read as absent (they are purged on the next `retrieve`).
    pub fn has(&self, kind: TokenKind) -> bool {
        let tokens = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tokens
            .get(&kind)
            .is_some_and(|record| record.expires_at.is_none_or(|at| at > Utc::now()))
    }

    pub fn remove(&self, kind: TokenKind) {
        let masked = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&kind)
            .map(|t| t.masked);
        if let Some(masked) = masked {
            self.cache_delete(kind);
            self.record_audit(kind, AuditAction::Removed, &masked);
        }
    }

    /// Exchange `refresh_token` for a fresh credential through the configured
    /// refresher and store it, bumping the rotation counter.
    pub async fn rotate(&self, kind: TokenKind, refresh_token: &str) -> LatticeResult<String> {
        let refresher = self
            .refresher
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        let Some(refresher) = refresher else {
            return Err(LatticeError::RotationFailed(
                "no token refresher configured".to_string(),
            ));
        };

        let new_token = refresher
            .refresh(kind, refresh_token)
            .await
            .map_err(|e| LatticeError::RotationFailed(e.to_string()))?;

        self.store(kind, &new_token, None)?;
        let masked = {
            let mut tokens = self
                .tokens
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let record = tokens
                .get_mut(&kind)
                .ok_or(LatticeError::RotationFailed("store lost record".to_string()))?;
            record.rotation_count += 1;
            record.masked.clone()
        };
        self.record_audit(kind, AuditAction::Rotated, &masked);
        Ok(new_token)
    }

    pub fn status(&self) -> VaultStatus {
        let tokens = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let audit = self
            .audit
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        VaultStatus {
            encryption_enabled: true,
            tokens: tokens
                .iter()
                .map(|(kind, record)| {
                    (
                        *kind,
                        TokenStatus {
                            created_at: record.created_at,
                            last_used: record.last_used,
                            expires_at: record.expires_at,
                            rotation_count: record.rotation_count,
                        },
                    )
                })
                .collect(),
            audit_entries: audit.len(),
        }
    }

    /// Snapshot of the audit log, oldest first.
    pub fn audit_log(&self) -> Vec<AuditEvent> {
        self.audit
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

fn validate_token_format(token: &str) -> LatticeResult<()> {
    if token.len() < MIN_TOKEN_LEN {
        return Err(LatticeError::InvalidTokenFormat(format!(
            "token shorter than {} characters",
            MIN_TOKEN_LEN
        )));
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(LatticeError::InvalidTokenFormat(format!(
            "token longer than {} characters",
            MAX_TOKEN_LEN
        )));
    }
    if !token.chars().all(|c| c.is_ascii_graphic()) {
        return Err(LatticeError::InvalidTokenFormat(
            "token contains whitespace or non-printable characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
