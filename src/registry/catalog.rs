//! Built-in tool catalog.
//!
//! Every catalog tool routes through one uniform handler: the descriptor
//! carries an HTTP method and a path template, the handler substitutes
//! `{placeholder}` segments from the parameters and forwards the rest as
//! query string (reads) or JSON body (writes). The catalog is
//! representative rather than exhaustive; additional endpoint wrappers
//! register through the same [`ToolRegistry`] surface.

use crate::client::PlatformClient;
use crate::registry::preset::Preset;
use crate::registry::{Envelope, HandlerContext, ToolDescriptor, ToolHandler, ToolRegistry};
use crate::vault::TokenKind;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Uniform handler binding a descriptor to one platform endpoint.
struct EndpointHandler {
    method: Method,
    /// Path template with `{param}` placeholders, e.g.
    /// `/open-apis/im/v1/chats/{chat_id}`.
    path: &'static str,
}

impl EndpointHandler {
    fn new(method: Method, path: &'static str) -> Arc<Self> {
        Arc::new(Self { method, path })
    }

    /// Fill `{param}` placeholders from the params object, removing consumed
    /// keys. Missing placeholders are a parameter error.
    fn expand_path(&self, params: &mut Map<String, Value>) -> anyhow::Result<String> {
        let mut path = String::with_capacity(self.path.len());
        let mut rest = self.path;
        while let Some(start) = rest.find('{') {
            let Some(end) = rest[start..].find('}') else {
                anyhow::bail!("malformed path template '{}'", self.path);
            };
            path.push_str(&rest[..start]);
            let key = &rest[start + 1..start + end];
            let value = params
                .remove(key)
                .ok_or_else(|| anyhow::anyhow!("missing required parameter '{}'", key))?;
            match value {
                Value::String(s) => path.push_str(&s),
                Value::Number(n) => path.push_str(&n.to_string()),
                other => anyhow::bail!("parameter '{}' must be a string, got {}", key, other),
            }
            rest = &rest[start + end + 1..];
        }
        path.push_str(rest);
        Ok(path)
    }
}

#[async_trait]
impl ToolHandler for EndpointHandler {
    async fn call(
        &self,
        client: &PlatformClient,
        params: Value,
        ctx: &HandlerContext<'_>,
    ) -> anyhow::Result<Envelope> {
        let mut params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => anyhow::bail!("parameters must be an object, got {}", other),
        };

        let path = self.expand_path(&mut params)?;

        let data = if self.method == Method::GET {
            let query: Vec<(String, String)> = params
                .into_iter()
                .map(|(k, v)| {
                    let rendered = match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, rendered)
                })
                .collect();
            client
                .send_json(Method::GET, &path, &query, None, ctx.token)
                .await?
        } else {
            let body = Value::Object(params);
            client
                .send_json(self.method.clone(), &path, &[], Some(&body), ctx.token)
                .await?
        };

        Ok(Envelope::text(serde_json::to_string_pretty(&data)?))
    }
}

struct CatalogEntry {
    name: &'static str,
    description: &'static str,
    method: Method,
    path: &'static str,
    required: &'static [TokenKind],
    schema: fn() -> Value,
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn entries() -> Vec<CatalogEntry> {
    vec![
        // --- messaging ---
        CatalogEntry {
            name: "im.message.create",
            description: "Send a message to a chat or user",
            method: Method::POST,
            path: "/open-apis/im/v1/messages",
            required: &[TokenKind::Tenant, TokenKind::User],
            schema: || {
                object_schema(
                    json!({
                        "receive_id": {"type": "string", "description": "Chat or user id"},
                        "msg_type": {"type": "string", "description": "Message type, e.g. text"},
                        "content": {"type": "string", "description": "JSON-encoded message body"}
                    }),
                    &["receive_id", "msg_type", "content"],
                )
            },
        },
        CatalogEntry {
            name: "im.message.list",
            description: "List messages in a chat",
            method: Method::GET,
            path: "/open-apis/im/v1/messages",
            required: &[TokenKind::Tenant, TokenKind::User],
            schema: || {
                object_schema(
                    json!({
                        "container_id": {"type": "string"},
                        "page_size": {"type": "integer"},
                        "page_token": {"type": "string"}
                    }),
                    &["container_id"],
                )
            },
        },
        CatalogEntry {
            name: "im.chat.create",
            description: "Create a group chat",
            method: Method::POST,
            path: "/open-apis/im/v1/chats",
            required: &[TokenKind::Tenant, TokenKind::User],
            schema: || {
                object_schema(
                    json!({
                        "name": {"type": "string"},
                        "description": {"type": "string"},
                        "user_id_list": {"type": "array", "items": {"type": "string"}}
                    }),
                    &["name"],
                )
            },
        },
        CatalogEntry {
            name: "im.chat.list",
            description: "List chats visible to the caller",
            method: Method::GET,
            path: "/open-apis/im/v1/chats",
            required: &[TokenKind::Tenant, TokenKind::User],
            schema: || {
                object_schema(
                    json!({
                        "page_size": {"type": "integer"},
                        "page_token": {"type": "string"}
                    }),
                    &[],
                )
            },
        },
        // --- contacts ---
        CatalogEntry {
            name: "contact.user.get",
            description: "Fetch a user's profile",
            method: Method::GET,
            path: "/open-apis/contact/v3/users/{user_id}",
            required: &[TokenKind::Tenant, TokenKind::User],
            schema: || {
                object_schema(
                    json!({
                        "user_id": {"type": "string"},
                        "user_id_type": {"type": "string"}
                    }),
                    &["user_id"],
                )
            },
        },
        CatalogEntry {
            name: "contact.department.children",
            description: "List child departments",
            method: Method::GET,
            path: "/open-apis/contact/v3/departments/{department_id}/children",
            required: &[TokenKind::Tenant],
            schema: || {
                object_schema(
                    json!({
                        "department_id": {"type": "string"},
                        "page_size": {"type": "integer"}
                    }),
                    &["department_id"],
                )
            },
        },
        // --- calendar ---
        CatalogEntry {
            name: "calendar.event.create",
            description: "Create a calendar event",
            method: Method::POST,
            path: "/open-apis/calendar/v4/calendars/{calendar_id}/events",
            required: &[TokenKind::User],
            schema: || {
                object_schema(
                    json!({
                        "calendar_id": {"type": "string"},
                        "summary": {"type": "string"},
                        "start_time": {"type": "object"},
                        "end_time": {"type": "object"}
                    }),
                    &["calendar_id", "summary", "start_time", "end_time"],
                )
            },
        },
        CatalogEntry {
            name: "calendar.event.list",
            description: "List events on a calendar",
            method: Method::GET,
            path: "/open-apis/calendar/v4/calendars/{calendar_id}/events",
            required: &[TokenKind::User],
            schema: || {
                object_schema(
                    json!({
                        "calendar_id": {"type": "string"},
                        "start_time": {"type": "string"},
                        "end_time": {"type": "string"},
                        "page_size": {"type": "integer"}
                    }),
                    &["calendar_id"],
                )
            },
        },
        // --- sheets ---
        CatalogEntry {
            name: "sheets.range.read",
            description: "Read a cell range from a spreadsheet",
            method: Method::GET,
            path: "/open-apis/sheets/v2/spreadsheets/{spreadsheet_token}/values/{range}",
            required: &[TokenKind::Tenant, TokenKind::User],
            schema: || {
                object_schema(
                    json!({
                        "spreadsheet_token": {"type": "string"},
                        "range": {"type": "string", "description": "A1-style range"}
                    }),
                    &["spreadsheet_token", "range"],
                )
            },
        },
        CatalogEntry {
            name: "sheets.range.write",
            description: "Write values into a cell range",
            method: Method::PUT,
            path: "/open-apis/sheets/v2/spreadsheets/{spreadsheet_token}/values",
            required: &[TokenKind::Tenant, TokenKind::User],
            schema: || {
                object_schema(
                    json!({
                        "spreadsheet_token": {"type": "string"},
                        "valueRange": {"type": "object"}
                    }),
                    &["spreadsheet_token", "valueRange"],
                )
            },
        },
        // --- bases (bitable) ---
        CatalogEntry {
            name: "base.appTableRecord.create",
            description: "Create a record in a base table",
            method: Method::POST,
            path: "/open-apis/bitable/v1/apps/{app_token}/tables/{table_id}/records",
            required: &[TokenKind::Tenant, TokenKind::User],
            schema: || {
                object_schema(
                    json!({
                        "app_token": {"type": "string"},
                        "table_id": {"type": "string"},
                        "fields": {"type": "object"}
                    }),
                    &["app_token", "table_id", "fields"],
                )
            },
        },
        CatalogEntry {
            name: "base.appTableRecord.search",
            description: "Search records in a base table",
            method: Method::POST,
            path: "/open-apis/bitable/v1/apps/{app_token}/tables/{table_id}/records/search",
            required: &[TokenKind::Tenant, TokenKind::User],
            schema: || {
                object_schema(
                    json!({
                        "app_token": {"type": "string"},
                        "table_id": {"type": "string"},
                        "filter": {"type": "object"},
                        "page_size": {"type": "integer"}
                    }),
                    &["app_token", "table_id"],
                )
            },
        },
        CatalogEntry {
            name: "base.appTable.list",
            description: "List tables in a base",
            method: Method::GET,
            path: "/open-apis/bitable/v1/apps/{app_token}/tables",
            required: &[TokenKind::Tenant, TokenKind::User],
            schema: || {
                object_schema(
                    json!({
                        "app_token": {"type": "string"},
                        "page_size": {"type": "integer"}
                    }),
                    &["app_token"],
                )
            },
        },
        // --- admin ---
        CatalogEntry {
            name: "tenant.info.get",
            description: "Fetch tenant information",
            method: Method::GET,
            path: "/open-apis/tenant/v2/tenant/query",
            required: &[TokenKind::Tenant],
            schema: || object_schema(json!({}), &[]),
        },
    ]
}

/// Build the registry of built-in tools.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for entry in entries() {
        registry.register(ToolDescriptor {
            name: entry.name.to_string(),
            description: entry.description.to_string(),
            input_schema: (entry.schema)(),
            required_tokens: entry.required.to_vec(),
            project: entry
                .name
                .split('.')
                .next()
                .unwrap_or_default()
                .to_string(),
            handler: EndpointHandler::new(entry.method.clone(), entry.path),
        });
    }
    registry
}

/// Built-in presets over the catalog.
pub fn builtin_presets() -> Vec<Preset> {
    let messaging = Preset::new(
        "messaging",
        vec![
            "im.message.create",
            "im.message.list",
            "im.chat.create",
            "im.chat.list",
            "contact.user.get",
        ],
    );
    let calendar = Preset::new(
        "calendar",
        vec!["calendar.event.create", "calendar.event.list", "contact.user.get"],
    );
    let base = Preset::new(
        "base",
        vec![
            "base.appTableRecord.create",
            "base.appTableRecord.search",
            "base.appTable.list",
        ],
    );
    let readonly = Preset::new(
        "readonly",
        vec![
            "im.message.list",
            "im.chat.list",
            "contact.user.get",
            "contact.department.children",
            "calendar.event.list",
            "sheets.range.read",
            "base.appTableRecord.search",
            "base.appTable.list",
            "tenant.info.get",
        ],
    );
    let default = Preset {
        name: "default".to_string(),
        tools: Preset::compose(&[&messaging, &calendar, &base]),
    };
    vec![default, messaging, calendar, base, readonly]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::TieredRateLimiter;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_catalog_names_are_canonical() {
        let registry = builtin_registry();
        for name in registry.names() {
            crate::registry::casing::validate_canonical(name).unwrap();
        }
        assert!(registry.len() >= 10);
    }

    #[test]
    fn test_presets_reference_real_tools() {
        let registry = builtin_registry();
        for preset in builtin_presets() {
            for tool in &preset.tools {
                assert!(
                    registry.get(tool).is_some(),
                    "preset '{}' references unknown tool '{}'",
                    preset.name,
                    tool
                );
            }
        }
    }

    #[test]
    fn test_default_preset_is_deduplicated() {
        let presets = builtin_presets();
        let default = presets.iter().find(|p| p.name == "default").unwrap();
        let mut seen = std::collections::HashSet::new();
        for tool in &default.tools {
            assert!(seen.insert(tool), "duplicate '{}' in default preset", tool);
        }
        // contact.user.get appears in both messaging and calendar; once here.
        assert_eq!(
            default.tools.iter().filter(|t| *t == "contact.user.get").count(),
            1
        );
    }

    #[test]
    fn test_expand_path_consumes_placeholders() {
        let handler = EndpointHandler {
            method: Method::GET,
            path: "/open-apis/contact/v3/users/{user_id}",
        };
        let mut params = serde_json::from_value::<Map<String, Value>>(
            json!({"user_id": "u-1", "user_id_type": "open_id"}),
        )
        .unwrap();
        let path = handler.expand_path(&mut params).unwrap();
        assert_eq!(path, "/open-apis/contact/v3/users/u-1");
        assert!(!params.contains_key("user_id"));
        assert!(params.contains_key("user_id_type"));
    }

    #[test]
    fn test_expand_path_missing_placeholder_errors() {
        let handler = EndpointHandler {
            method: Method::GET,
            path: "/x/{missing}",
        };
        let mut params = Map::new();
        assert!(handler.expand_path(&mut params).is_err());
    }

    #[tokio::test]
    async fn test_get_tool_sends_query_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/open-apis/contact/v3/users/u-42"))
            .and(query_param("user_id_type", "open_id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"code": 0, "data": {"user": {"name": "Ada"}}}),
            ))
            .mount(&server)
            .await;

        let client = PlatformClient::new(
            &server.uri(),
            5,
            0,
            Arc::new(TieredRateLimiter::default()),
        )
        .unwrap();
        let registry = builtin_registry();
        let descriptor = registry.get("contact.user.get").unwrap();
        let ctx = HandlerContext {
            token: Some("t-token-12345678"),
            token_kind: TokenKind::Tenant,
            descriptor: &descriptor,
        };
        let envelope = descriptor
            .handler
            .call(
                &client,
                json!({"user_id": "u-42", "user_id_type": "open_id"}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!envelope.is_error);
        let Envelope { content, .. } = envelope;
        let crate::registry::ContentBlock::Text { text } = &content[0];
        assert!(text.contains("Ada"));
    }

    #[tokio::test]
    async fn test_post_tool_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/open-apis/im/v1/messages"))
            .and(body_json(json!({
                "receive_id": "oc_1",
                "msg_type": "text",
                "content": "{\"text\":\"hi\"}"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"code": 0, "data": {"message_id": "m1"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = PlatformClient::new(
            &server.uri(),
            5,
            0,
            Arc::new(TieredRateLimiter::default()),
        )
        .unwrap();
        let registry = builtin_registry();
        let descriptor = registry.get("im.message.create").unwrap();
        let ctx = HandlerContext {
            token: Some("t-token-12345678"),
            token_kind: TokenKind::Tenant,
            descriptor: &descriptor,
        };
        let envelope = descriptor
            .handler
            .call(
                &client,
                json!({
                    "receive_id": "oc_1",
                    "msg_type": "text",
                    "content": "{\"text\":\"hi\"}"
                }),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!envelope.is_error);
    }
}
