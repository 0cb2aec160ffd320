use super::*;
use serde_json::json;

fn small_category(max_entries: usize, max_bytes: usize) -> CacheManager {
    CacheManager::new(HashMap::from([(
        CacheCategory::General,
        CategoryLimits::new(Duration::from_secs(60), max_entries, max_bytes),
    )]))
}

#[tokio::test(start_paused = true)]
async fn test_set_get_round_trip() {
    let cache = CacheManager::default();
    cache.set(CacheCategory::UserInfo, "u1", json!({"name": "ada"}), None);
    assert_eq!(
        cache.get(CacheCategory::UserInfo, "u1"),
        Some(json!({"name": "ada"}))
    );
}

#[tokio::test(start_paused = true)]
async fn test_categories_are_partitioned() {
    let cache = CacheManager::default();
    cache.set(CacheCategory::UserInfo, "k", json!(1), None);
    assert!(cache.get(CacheCategory::ChatInfo, "k").is_none());
    assert!(cache.get(CacheCategory::UserInfo, "k").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_a_miss_and_removed() {
    let cache = CacheManager::default();
    cache.set(
        CacheCategory::General,
        "k",
        json!("v"),
        Some(Duration::from_millis(100)),
    );
    tokio::time::advance(Duration::from_millis(150)).await;

    assert!(cache.get(CacheCategory::General, "k").is_none());
    assert!(!cache.has(CacheCategory::General, "k"));
    let m = cache.metrics();
    assert_eq!(m.category_entries["general"], 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_ttl_is_never_hit() {
    let cache = CacheManager::default();
    cache.set(
        CacheCategory::General,
        "k",
        json!("v"),
        Some(Duration::ZERO),
    );
    assert!(cache.get(CacheCategory::General, "k").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_lru_eviction_respects_recent_access() {
    let cache = small_category(3, 1024 * 1024);
    cache.set(CacheCategory::General, "a", json!("A"), None);
    cache.set(CacheCategory::General, "b", json!("B"), None);
    cache.set(CacheCategory::General, "c", json!("C"), None);

    // Touch A so B becomes least recently used.
    assert!(cache.get(CacheCategory::General, "a").is_some());
    cache.set(CacheCategory::General, "d", json!("D"), None);

    assert!(cache.get(CacheCategory::General, "b").is_none(), "B evicted");
    assert!(cache.get(CacheCategory::General, "a").is_some());
    assert!(cache.get(CacheCategory::General, "c").is_some());
    assert!(cache.get(CacheCategory::General, "d").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_byte_budget_evicts_lru() {
    let cache = small_category(100, 60);
    let chunk = "x".repeat(20);
    cache.set(CacheCategory::General, "a", json!(chunk.clone()), None);
    cache.set(CacheCategory::General, "b", json!(chunk.clone()), None);
    // Third entry pushes the shard past 60 bytes; "a" goes.
    cache.set(CacheCategory::General, "c", json!(chunk), None);

    assert!(cache.get(CacheCategory::General, "a").is_none());
    assert!(cache.get(CacheCategory::General, "b").is_some());
    assert!(cache.get(CacheCategory::General, "c").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_oversized_value_is_not_stored() {
    let cache = small_category(100, 32);
    cache.set(CacheCategory::General, "big", json!("y".repeat(64)), None);
    assert!(cache.get(CacheCategory::General, "big").is_none());
    assert_eq!(cache.metrics().category_bytes["general"], 0);
}

#[tokio::test(start_paused = true)]
async fn test_overwrite_replaces_value_and_bytes() {
    let cache = small_category(10, 1024);
    cache.set(CacheCategory::General, "k", json!("first-value"), None);
    let before = cache.metrics().category_bytes["general"];
    cache.set(CacheCategory::General, "k", json!("x"), None);
    let after = cache.metrics().category_bytes["general"];

    assert_eq!(cache.get(CacheCategory::General, "k"), Some(json!("x")));
    assert!(after < before);
    assert_eq!(cache.metrics().category_entries["general"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_delete_and_clear_category() {
    let cache = CacheManager::default();
    cache.set(CacheCategory::ChatInfo, "a", json!(1), None);
    cache.set(CacheCategory::ChatInfo, "b", json!(2), None);

    assert!(cache.delete(CacheCategory::ChatInfo, "a"));
    assert!(!cache.delete(CacheCategory::ChatInfo, "a"));
    assert_eq!(cache.clear_category(CacheCategory::ChatInfo), 1);
    assert_eq!(cache.metrics().category_entries["chatInfo"], 0);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_hit_rate() {
    let cache = CacheManager::default();
    cache.set(CacheCategory::General, "k", json!(1), None);
    let _ = cache.get(CacheCategory::General, "k");
    let _ = cache.get(CacheCategory::General, "k");
    let _ = cache.get(CacheCategory::General, "missing");

    let m = cache.metrics();
    assert_eq!(m.hits, 2);
    assert_eq!(m.misses, 1);
    assert!((m.hit_rate - 2.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_hash_key_is_stable_and_short() {
    assert_eq!(hash_key("abc"), hash_key("abc"));
    assert_ne!(hash_key("abc"), hash_key("abd"));
    assert_eq!(hash_key("anything").len(), 16);
}

#[test]
fn test_category_parse_round_trip() {
    for category in CacheCategory::ALL {
        assert_eq!(CacheCategory::parse(category.as_str()), Some(category));
    }
    assert_eq!(CacheCategory::parse("bogus"), None);
}
