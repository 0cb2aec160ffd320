//! MCP ingress transports: line-delimited JSON-RPC over stdio and an SSE
//! gateway. Both feed the same request handler; dispatcher failures come
//! back as JSON-RPC errors or error envelopes, never as a dead loop.

pub mod sse;
pub mod stdio;

use crate::registry::Dispatcher;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Protocol revision answered to `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Handle one JSON-RPC request. Returns `None` for notifications, which by
/// contract receive no response.
pub async fn handle_request(dispatcher: &Arc<Dispatcher>, request: RpcRequest) -> Option<RpcResponse> {
    let Some(id) = request.id.clone() else {
        // Notifications (e.g. `notifications/initialized`) are consumed.
        debug!("notification received: {}", request.method);
        return None;
    };

    if !request.jsonrpc.is_empty() && request.jsonrpc != JSONRPC_VERSION {
        return Some(RpcResponse::failure(
            id,
            INVALID_REQUEST,
            "unsupported jsonrpc version",
        ));
    }

    let response = match request.method.as_str() {
        "initialize" => handle_initialize(dispatcher, id, &request.params),
        "tools/list" => handle_tools_list(dispatcher, id),
        "tools/call" => handle_tools_call(dispatcher, id, request.params).await,
        "completion/complete" => handle_complete(dispatcher, id, &request.params),
        "ping" => RpcResponse::success(id, json!({})),
        other => RpcResponse::failure(id, METHOD_NOT_FOUND, format!("unknown method '{}'", other)),
    };
    Some(response)
}

fn handle_initialize(dispatcher: &Arc<Dispatcher>, id: Value, params: &Value) -> RpcResponse {
    // A caller-scoped user credential may arrive with the handshake.
    if let Some(token) = params.get("userAccessToken").and_then(Value::as_str) {
        if let Err(e) = dispatcher.set_user_token(token) {
            return RpcResponse::failure(id, e.jsonrpc_code(), e.to_string());
        }
    }
    RpcResponse::success(
        id,
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {},
                "completions": {}
            },
            "serverInfo": {
                "name": "lattice",
                "version": crate::VERSION
            }
        }),
    )
}

fn handle_tools_list(dispatcher: &Arc<Dispatcher>, id: Value) -> RpcResponse {
    let tools: Vec<Value> = dispatcher
        .list_tools()
        .into_iter()
        .map(|listing| {
            json!({
                "name": listing.name,
                "description": listing.description,
                "inputSchema": listing.input_schema
            })
        })
        .collect();
    RpcResponse::success(id, json!({ "tools": tools }))
}

async fn handle_tools_call(dispatcher: &Arc<Dispatcher>, id: Value, params: Value) -> RpcResponse {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return RpcResponse::failure(id, INVALID_PARAMS, "missing tool name");
    };
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or(Value::Object(serde_json::Map::new()));

    match dispatcher.invoke(name, arguments).await {
        Ok(envelope) => match serde_json::to_value(&envelope) {
            Ok(result) => RpcResponse::success(id, result),
            Err(e) => RpcResponse::failure(id, INTERNAL_ERROR, e.to_string()),
        },
        Err(e) => RpcResponse::failure(id, e.jsonrpc_code(), e.to_string()),
    }
}

fn handle_complete(dispatcher: &Arc<Dispatcher>, id: Value, params: &Value) -> RpcResponse {
    let prefix = params
        .pointer("/argument/value")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut values: Vec<String> = dispatcher
        .wire_names()
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .collect();
    let total = values.len();
    values.truncate(100);
    let has_more = total > values.len();
    RpcResponse::success(
        id,
        json!({
            "completion": {
                "values": values,
                "total": total,
                "hasMore": has_more
            }
        }),
    )
}
