use super::*;
use crate::limiter::TieredRateLimiter;
use crate::registry::{ContentBlock, ToolHandler};
use async_trait::async_trait;
use serde_json::json;

struct EchoKindHandler;

#[async_trait]
impl ToolHandler for EchoKindHandler {
    async fn call(
        &self,
        _client: &PlatformClient,
        _params: Value,
        ctx: &HandlerContext<'_>,
    ) -> anyhow::Result<Envelope> {
        Ok(Envelope::text(format!(
            "kind={} token={}",
            ctx.token_kind,
            ctx.token.unwrap_or("none")
        )))
    }
}

struct FailingHandler;

#[async_trait]
impl ToolHandler for FailingHandler {
    async fn call(
        &self,
        _client: &PlatformClient,
        _params: Value,
        _ctx: &HandlerContext<'_>,
    ) -> anyhow::Result<Envelope> {
        anyhow::bail!("remote exploded")
    }
}

struct PanickingHandler;

#[async_trait]
impl ToolHandler for PanickingHandler {
    async fn call(
        &self,
        _client: &PlatformClient,
        _params: Value,
        _ctx: &HandlerContext<'_>,
    ) -> anyhow::Result<Envelope> {
        panic!("handler bug")
    }
}

fn descriptor(
    name: &str,
    required: Vec<TokenKind>,
    handler: Arc<dyn ToolHandler>,
) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: format!("test tool {}", name),
        input_schema: json!({"type": "object"}),
        required_tokens: required,
        project: "test".to_string(),
        handler,
    }
}

fn test_client() -> Arc<PlatformClient> {
    Arc::new(
        PlatformClient::new(
            "http://127.0.0.1:9/",
            1,
            0,
            Arc::new(TieredRateLimiter::default()),
        )
        .unwrap(),
    )
}

fn test_vault() -> Arc<TokenVault> {
    Arc::new(TokenVault::new("dispatcher-test-secret", 100, None).unwrap())
}

fn build(
    descriptors: Vec<ToolDescriptor>,
    policy: ToolPolicy,
    style: NameStyle,
    vault: Arc<TokenVault>,
) -> LatticeResult<Dispatcher> {
    let mut registry = ToolRegistry::new();
    for descriptor in descriptors {
        registry.register(descriptor);
    }
    Dispatcher::new(registry, vec![], policy, style, test_client(), vault)
}

fn open_policy() -> ToolPolicy {
    ToolPolicy {
        preset: None,
        allow: None,
        deny: None,
        token_mode: TokenMode::Auto,
    }
}

#[tokio::test]
async fn test_invoke_unknown_tool() {
    let dispatcher = build(
        vec![descriptor("im.chat.list", vec![], Arc::new(EchoKindHandler))],
        open_policy(),
        NameStyle::Dotted,
        test_vault(),
    )
    .unwrap();

    let err = dispatcher.invoke("im.chat.missing", json!({})).await.unwrap_err();
    assert!(matches!(err, LatticeError::ToolNotFound(_)));
}

#[tokio::test]
async fn test_invoke_resolves_snake_names() {
    let dispatcher = build(
        vec![descriptor(
            "base.appTableRecord.create",
            vec![],
            Arc::new(EchoKindHandler),
        )],
        open_policy(),
        NameStyle::Snake,
        test_vault(),
    )
    .unwrap();

    let listings = dispatcher.list_tools();
    assert_eq!(listings[0].name, "base_app_table_record_create");

    let envelope = dispatcher
        .invoke("base_app_table_record_create", json!({}))
        .await
        .unwrap();
    assert!(!envelope.is_error);
}

#[tokio::test]
async fn test_build_rejects_wire_name_collisions() {
    let result = build(
        vec![
            descriptor("a.bC", vec![], Arc::new(EchoKindHandler)),
            descriptor("a.b.c", vec![], Arc::new(EchoKindHandler)),
        ],
        open_policy(),
        NameStyle::Camel,
        test_vault(),
    );
    assert!(matches!(result, Err(LatticeError::InvalidName(_))));
}

#[tokio::test]
async fn test_build_rejects_empty_tool_set() {
    let result = build(
        vec![descriptor("a.b.c", vec![], Arc::new(EchoKindHandler))],
        ToolPolicy {
            preset: Some("nonexistent".to_string()),
            ..Default::default()
        },
        NameStyle::Dotted,
        test_vault(),
    );
    assert!(matches!(result, Err(LatticeError::Misconfigured(_))));
}

#[tokio::test]
async fn test_auto_mode_prefers_user_token() {
    let vault = test_vault();
    vault
        .store(TokenKind::Tenant, "t-tenant-12345678", None)
        .unwrap();
    let dispatcher = build(
        vec![descriptor("a.b.c", vec![], Arc::new(EchoKindHandler))],
        open_policy(),
        NameStyle::Dotted,
        vault.clone(),
    )
    .unwrap();

    let envelope = dispatcher.invoke("a.b.c", json!({})).await.unwrap();
    let ContentBlock::Text { text } = &envelope.content[0];
    assert!(text.starts_with("kind=tenant"));

    dispatcher.set_user_token("u-user-1234567890").unwrap();
    let envelope = dispatcher.invoke("a.b.c", json!({})).await.unwrap();
    let ContentBlock::Text { text } = &envelope.content[0];
    assert!(text.starts_with("kind=user"));
    assert!(text.contains("u-user-1234567890"));
}

#[tokio::test]
async fn test_token_gating_blocks_before_handler() {
    let vault = test_vault();
    vault
        .store(TokenKind::User, "u-user-1234567890", None)
        .unwrap();
    // Tool requires a tenant credential but the policy pins user tokens.
    let dispatcher = build(
        vec![descriptor(
            "a.tenant.op",
            vec![TokenKind::Tenant],
            Arc::new(PanickingHandler),
        )],
        ToolPolicy {
            preset: None,
            allow: None,
            deny: None,
            token_mode: TokenMode::Auto,
        },
        NameStyle::Dotted,
        vault,
    )
    .unwrap();

    let err = dispatcher.invoke("a.tenant.op", json!({})).await.unwrap_err();
    // The panicking handler was never reached.
    assert!(matches!(err, LatticeError::AuthUnavailable { .. }));
}

#[tokio::test]
async fn test_missing_required_credential_is_auth_unavailable() {
    let dispatcher = build(
        vec![descriptor(
            "a.tenant.op",
            vec![TokenKind::Tenant],
            Arc::new(EchoKindHandler),
        )],
        open_policy(),
        NameStyle::Dotted,
        test_vault(),
    )
    .unwrap();

    let err = dispatcher.invoke("a.tenant.op", json!({})).await.unwrap_err();
    assert!(matches!(err, LatticeError::AuthUnavailable { .. }));
}

#[tokio::test]
async fn test_handler_error_becomes_error_envelope() {
    let dispatcher = build(
        vec![descriptor("a.b.c", vec![], Arc::new(FailingHandler))],
        open_policy(),
        NameStyle::Dotted,
        test_vault(),
    )
    .unwrap();

    let envelope = dispatcher.invoke("a.b.c", json!({})).await.unwrap();
    assert!(envelope.is_error);
    let ContentBlock::Text { text } = &envelope.content[0];
    assert!(text.contains("remote exploded"));
}

#[tokio::test]
async fn test_handler_panic_becomes_error_envelope() {
    let dispatcher = build(
        vec![descriptor("a.b.c", vec![], Arc::new(PanickingHandler))],
        open_policy(),
        NameStyle::Dotted,
        test_vault(),
    )
    .unwrap();

    let envelope = dispatcher.invoke("a.b.c", json!({})).await.unwrap();
    assert!(envelope.is_error);
    let ContentBlock::Text { text } = &envelope.content[0];
    assert!(text.contains("crashed"));
}

#[tokio::test]
async fn test_invalid_wire_name_rejected() {
    let dispatcher = build(
        vec![descriptor("a.b.c", vec![], Arc::new(EchoKindHandler))],
        open_policy(),
        NameStyle::Dotted,
        test_vault(),
    )
    .unwrap();

    let err = dispatcher.invoke("a b/c", json!({})).await.unwrap_err();
    assert!(matches!(err, LatticeError::InvalidName(_)));
}

#[tokio::test]
async fn test_set_user_token_validates_format() {
    let dispatcher = build(
        vec![descriptor("a.b.c", vec![], Arc::new(EchoKindHandler))],
        open_policy(),
        NameStyle::Dotted,
        test_vault(),
    )
    .unwrap();

    assert!(matches!(
        dispatcher.set_user_token("bad"),
        Err(LatticeError::InvalidTokenFormat(_))
    ));
}

#[tokio::test]
async fn test_resolve_policy_is_memoised() {
    let dispatcher = build(
        vec![
            descriptor("a.one.get", vec![], Arc::new(EchoKindHandler)),
            descriptor("a.two.get", vec![], Arc::new(EchoKindHandler)),
        ],
        open_policy(),
        NameStyle::Dotted,
        test_vault(),
    )
    .unwrap();

    let policy = ToolPolicy {
        preset: None,
        allow: Some(vec!["a.one.get".to_string()]),
        deny: None,
        token_mode: TokenMode::Auto,
    };
    let first = dispatcher.resolve_policy(&policy);
    let second = dispatcher.resolve_policy(&policy);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.as_slice(), ["a.one.get".to_string()]);
}
