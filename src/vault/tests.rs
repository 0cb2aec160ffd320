use super::*;
use crate::cache::CacheManager;
use chrono::Duration as ChronoDuration;

fn vault() -> TokenVault {
    TokenVault::new("unit-test-secret", 100, None).unwrap()
}

fn vault_with_cache() -> (TokenVault, Arc<CacheManager>) {
    let cache = Arc::new(CacheManager::default());
    let vault = TokenVault::new("unit-test-secret", 100, Some(cache.clone())).unwrap();
    (vault, cache)
}

#[test]
fn test_store_retrieve_round_trip() {
    let vault = vault();
    vault
        .store(TokenKind::User, "u-1234567890abcdef", None)
        .unwrap();
    assert_eq!(
        vault.retrieve(TokenKind::User).unwrap().as_deref(),
        Some("u-1234567890abcdef")
    );
}

#[test]
fn test_retrieve_missing_is_none() {
    let vault = vault();
    assert!(vault.retrieve(TokenKind::Tenant).unwrap().is_none());
}

#[test]
fn test_invalid_format_rejected() {
    let vault = vault();
    assert!(matches!(
        vault.store(TokenKind::App, "short", None),
        Err(LatticeError::InvalidTokenFormat(_))
    ));
    assert!(matches!(
        vault.store(TokenKind::App, "has a space in it", None),
        Err(LatticeError::InvalidTokenFormat(_))
    ));
    let too_long = "x".repeat(5000);
    assert!(vault.store(TokenKind::App, &too_long, None).is_err());
}

#[test]
fn test_expired_token_purged_and_audited() {
    let vault = vault();
    let past = Utc::now() - ChronoDuration::seconds(10);
    vault
        .store(TokenKind::App, "a-1234567890abcdef", Some(past))
        .unwrap();

    assert!(vault.retrieve(TokenKind::App).unwrap().is_none());
    // Second retrieve: record already gone.
    assert!(vault.retrieve(TokenKind::App).unwrap().is_none());

    let audit = vault.audit_log();
    let expired: Vec<_> = audit
        .iter()
        .filter(|e| e.action == AuditAction::Expired)
        .collect();
    assert_eq!(expired.len(), 1);
}

#[test]
fn test_tampered_cached_bundle_detected_and_purged() {
    let (vault, cache) = vault_with_cache();
    vault
        .store(TokenKind::User, "abcdefxxxxxxghij", None)
        .unwrap();

    // Corrupt one byte of the persisted ciphertext (the cached bundle).
    let key = "token:user";
    let blob = cache
        .get(crate::cache::CacheCategory::AppTokens, key)
        .unwrap();
    let mut bytes = hex::decode(blob.as_str().unwrap()).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    cache.set(
        crate::cache::CacheCategory::AppTokens,
        key,
        serde_json::json!(hex::encode(bytes)),
        None,
    );

    assert!(vault.retrieve(TokenKind::User).unwrap().is_none());

    let audit = vault.audit_log();
    let invalid: Vec<_> = audit
        .iter()
        .filter(|e| e.action == AuditAction::Invalid)
        .collect();
    assert_eq!(invalid.len(), 1);
    assert_eq!(invalid[0].masked, "abcd****ghij");

    // Record destroyed: nothing left to retrieve even after cache purge.
    assert!(vault.retrieve(TokenKind::User).unwrap().is_none());
}

#[test]
fn test_cache_eviction_does_not_destroy_token() {
    let (vault, cache) = vault_with_cache();
    vault
        .store(TokenKind::Tenant, "t-1234567890abcdef", None)
        .unwrap();

    cache.clear_category(crate::cache::CacheCategory::AppTokens);

    assert_eq!(
        vault.retrieve(TokenKind::Tenant).unwrap().as_deref(),
        Some("t-1234567890abcdef")
    );
}

#[test]
fn test_audit_masks_and_never_contains_raw_token() {
    let vault = vault();
    let token = "abcdefsecretsecretghij";
    vault.store(TokenKind::User, token, None).unwrap();
    let _ = vault.retrieve(TokenKind::User).unwrap();

    let audit = vault.audit_log();
    assert!(audit.len() >= 2);
    for event in &audit {
        assert!(!event.masked.contains("secret"));
        assert_eq!(event.masked, "abcd****ghij");
    }
}

#[test]
fn test_remove_is_audited() {
    let vault = vault();
    vault
        .store(TokenKind::User, "u-1234567890abcdef", None)
        .unwrap();
    vault.remove(TokenKind::User);
    assert!(vault.retrieve(TokenKind::User).unwrap().is_none());
    assert!(vault
        .audit_log()
        .iter()
        .any(|e| e.action == AuditAction::Removed));
}

#[test]
fn test_audit_log_is_bounded() {
    let vault = TokenVault::new("unit-test-secret", 5, None).unwrap();
    for i in 0..20 {
        vault
            .store(TokenKind::App, &format!("a-token-number-{:04}", i), None)
            .unwrap();
    }
    assert_eq!(vault.audit_log().len(), 5);
}

#[test]
fn test_status_reports_tokens() {
    let vault = vault();
    vault
        .store(TokenKind::App, "a-1234567890abcdef", None)
        .unwrap();
    let status = vault.status();
    assert!(status.encryption_enabled);
    assert_eq!(status.tokens.len(), 1);
    assert!(status.tokens.contains_key(&TokenKind::App));
}

#[tokio::test]
async fn test_rotate_without_refresher_fails() {
    let vault = vault();
    assert!(matches!(
        vault.rotate(TokenKind::User, "refresh-123456").await,
        Err(LatticeError::RotationFailed(_))
    ));
}

#[tokio::test]
async fn test_rotate_with_refresher_stores_new_token() {
    struct StaticRefresher;
    #[async_trait::async_trait]
    impl TokenRefresher for StaticRefresher {
        async fn refresh(&self, kind: TokenKind, refresh_token: &str) -> anyhow::Result<String> {
            Ok(format!("{}-rotated-{}", kind.as_str(), refresh_token))
        }
    }

    let vault = vault();
    vault
        .store(TokenKind::User, "u-1234567890abcdef", None)
        .unwrap();
    vault.set_refresher(Arc::new(StaticRefresher));

    let new_token = vault.rotate(TokenKind::User, "refresh0001").await.unwrap();
    assert_eq!(new_token, "user-rotated-refresh0001");
    assert_eq!(
        vault.retrieve(TokenKind::User).unwrap().as_deref(),
        Some("user-rotated-refresh0001")
    );
    assert_eq!(vault.status().tokens[&TokenKind::User].rotation_count, 1);
    assert!(vault
        .audit_log()
        .iter()
        .any(|e| e.action == AuditAction::Rotated));
}
