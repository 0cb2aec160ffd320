//! The two conversation stores must honour the same contract: append-only
//! ordering, AND-combined filters, retention, typed timestamps, optional
//! encryption sharing the vault's AEAD construction.

use chrono::{Duration as ChronoDuration, Utc};
use lattice::convo::{
    Conversation, ConversationFilter, ConversationMessage, ConversationPatch, ConversationStore,
    FileConversationStore, MessageRole, SqliteConversationStore,
};
use lattice::vault::crypto::SealedBox;
use std::sync::Arc;

fn stores(tmp: &std::path::Path) -> Vec<(&'static str, Arc<dyn ConversationStore>)> {
    vec![
        (
            "file",
            Arc::new(FileConversationStore::new(tmp.join("files"), None, 30).unwrap()),
        ),
        (
            "sqlite",
            Arc::new(SqliteConversationStore::new(tmp.join("convo.db"), None, 30).unwrap()),
        ),
    ]
}

#[tokio::test]
async fn message_order_is_exactly_append_order() {
    let tmp = tempfile::TempDir::new().unwrap();
    for (label, store) in stores(tmp.path()) {
        let mut conversation = Conversation::new("chat-1", "helper");
        store.save(&conversation).await.unwrap();

        for i in 0..6 {
            conversation = store
                .update(
                    &conversation.conversation_id,
                    ConversationPatch {
                        append_messages: vec![ConversationMessage::new(
                            if i % 2 == 0 {
                                MessageRole::User
                            } else {
                                MessageRole::Assistant
                            },
                            format!("m{}", i),
                        )],
                        ..Default::default()
                    },
                )
                .await
                .unwrap()
                .unwrap();
        }

        let loaded = store
            .get(&conversation.conversation_id)
            .await
            .unwrap()
            .unwrap();
        let contents: Vec<&str> = loaded.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["m0", "m1", "m2", "m3", "m4", "m5"],
            "append order broken in {} store",
            label
        );
        assert!(loaded.updated_at >= loaded.created_at);
    }
}

#[tokio::test]
async fn filters_and_retention_behave_identically() {
    let tmp = tempfile::TempDir::new().unwrap();
    for (label, store) in stores(tmp.path()) {
        let keeper = Conversation::new("chat-keep", "helper").with_user("u-1");
        store.save(&keeper).await.unwrap();

        let mut stale = Conversation::new("chat-stale", "helper").with_user("u-2");
        stale.updated_at = Utc::now() - ChronoDuration::days(45);
        store.save(&stale).await.unwrap();

        let by_user = store
            .list(&ConversationFilter {
                user_id: Some("u-1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_user.len(), 1, "{} store filter failed", label);
        assert_eq!(by_user[0].chat_id, "chat-keep");

        assert_eq!(store.cleanup().await.unwrap(), 1, "{} store cleanup", label);
        assert!(store.get(&stale.conversation_id).await.unwrap().is_none());
        assert!(store.get(&keeper.conversation_id).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn encrypted_stores_round_trip_without_leaking_plaintext() {
    let tmp = tempfile::TempDir::new().unwrap();

    let file_store = FileConversationStore::new(
        tmp.path().join("enc-files"),
        Some(SealedBox::from_secret("convo-secret").unwrap()),
        30,
    )
    .unwrap();
    let sqlite_store = SqliteConversationStore::new(
        tmp.path().join("enc.db"),
        Some(SealedBox::from_secret("convo-secret").unwrap()),
        30,
    )
    .unwrap();
    let stores: Vec<(&str, Arc<dyn ConversationStore>)> = vec![
        ("file", Arc::new(file_store)),
        ("sqlite", Arc::new(sqlite_store)),
    ];

    for (label, store) in stores {
        let mut conversation = Conversation::new("chat-1", "helper");
        conversation.append_message(ConversationMessage::new(
            MessageRole::User,
            "the launch code is 0000",
        ));
        store.save(&conversation).await.unwrap();

        let loaded = store
            .get(&conversation.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            loaded.messages[0].content, "the launch code is 0000",
            "{} store round trip",
            label
        );
        assert!(store.stats().await.unwrap().encrypted);
    }

    // Nothing readable on disk in either representation.
    let mut leaked = false;
    for entry in walk(tmp.path()) {
        if let Ok(bytes) = std::fs::read(&entry) {
            if String::from_utf8_lossy(&bytes).contains("launch code") {
                leaked = true;
            }
        }
    }
    assert!(!leaked, "plaintext found on disk");
}

fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                out.extend(walk(&path));
            } else {
                out.push(path);
            }
        }
    }
    out
}
