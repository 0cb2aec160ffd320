use lattice::cache::{CacheCategory, CacheManager, CategoryLimits};
use lattice::vault::{AuditAction, TokenKind, TokenVault};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn lru_keeps_recently_read_entries() {
    let cache = CacheManager::new(HashMap::from([(
        CacheCategory::General,
        CategoryLimits::new(Duration::from_secs(60), 3, 1024 * 1024),
    )]));

    cache.set(CacheCategory::General, "A", json!("a"), None);
    cache.set(CacheCategory::General, "B", json!("b"), None);
    cache.set(CacheCategory::General, "C", json!("c"), None);

    // Reading A makes B the least recently used entry.
    assert!(cache.get(CacheCategory::General, "A").is_some());
    cache.set(CacheCategory::General, "D", json!("d"), None);

    assert!(cache.get(CacheCategory::General, "B").is_none());
    for key in ["A", "C", "D"] {
        assert!(cache.get(CacheCategory::General, key).is_some(), "{} evicted", key);
    }
}

#[tokio::test(start_paused = true)]
async fn ttl_expiry_reads_as_miss() {
    let cache = CacheManager::default();
    cache.set(
        CacheCategory::UserInfo,
        "u1",
        json!({"name": "Ada"}),
        Some(Duration::from_secs(1)),
    );
    assert!(cache.get(CacheCategory::UserInfo, "u1").is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(cache.get(CacheCategory::UserInfo, "u1").is_none());

    let metrics = cache.metrics();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.misses, 1);
}

#[test]
fn vault_round_trip_returns_exact_bytes() {
    let vault = TokenVault::new("integration-secret", 100, None).unwrap();
    let token = "u-3x4mpl3-Token_0123456789";
    vault.store(TokenKind::User, token, None).unwrap();
    assert_eq!(vault.retrieve(TokenKind::User).unwrap().as_deref(), Some(token));
}

#[test]
fn tampered_ciphertext_is_rejected_and_audited_masked() {
    let cache = Arc::new(CacheManager::default());
    let vault = TokenVault::new("integration-secret", 100, Some(cache.clone())).unwrap();

    // Store "abcdef…ghij" and corrupt one byte of the persisted ciphertext.
    vault
        .store(TokenKind::User, "abcdefxxxxxxghij", None)
        .unwrap();
    let blob = cache.get(CacheCategory::AppTokens, "token:user").unwrap();
    let mut bytes = hex::decode(blob.as_str().unwrap()).unwrap();
    bytes[20] ^= 0x01;
    cache.set(
        CacheCategory::AppTokens,
        "token:user",
        json!(hex::encode(bytes)),
        None,
    );

    // Retrieval reports absence, never a wrong value.
    assert!(vault.retrieve(TokenKind::User).unwrap().is_none());

    let invalid: Vec<_> = vault
        .audit_log()
        .into_iter()
        .filter(|e| e.action == AuditAction::Invalid)
        .collect();
    assert_eq!(invalid.len(), 1);
    assert_eq!(invalid[0].masked, "abcd****ghij");
}

#[test]
fn vault_audit_never_holds_raw_tokens() {
    let vault = TokenVault::new("integration-secret", 100, None).unwrap();
    let token = "t-very-confidential-token-material";
    vault.store(TokenKind::Tenant, token, None).unwrap();
    let _ = vault.retrieve(TokenKind::Tenant).unwrap();
    vault.remove(TokenKind::Tenant);

    for event in vault.audit_log() {
        assert!(!event.masked.contains("confidential"));
    }
}

#[test]
fn cache_eviction_leaves_vaulted_token_intact() {
    let cache = Arc::new(CacheManager::default());
    let vault = TokenVault::new("integration-secret", 100, Some(cache.clone())).unwrap();
    vault
        .store(TokenKind::App, "a-123456789012345", None)
        .unwrap();

    assert_eq!(cache.clear_category(CacheCategory::AppTokens), 1);
    assert_eq!(
        vault.retrieve(TokenKind::App).unwrap().as_deref(),
        Some("a-123456789012345")
    );
}
