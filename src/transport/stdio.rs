//! Line-delimited JSON-RPC over stdin/stdout.
//!
//! One JSON object per line in, one per line out. Malformed lines get a
//! parse-error response; nothing a client sends can take the loop down.

use super::{handle_request, RpcRequest, RpcResponse, PARSE_ERROR};
use crate::registry::Dispatcher;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

pub async fn serve(dispatcher: Arc<Dispatcher>) -> Result<()> {
    info!("stdio transport ready");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!("stdio request: {} bytes", line.len());

        let response = match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => handle_request(&dispatcher, request).await,
            Err(e) => Some(RpcResponse::failure(
                Value::Null,
                PARSE_ERROR,
                format!("parse error: {}", e),
            )),
        };

        if let Some(response) = response {
            let mut payload = serde_json::to_string(&response)?;
            payload.push('\n');
            stdout.write_all(payload.as_bytes()).await?;
            stdout.flush().await?;
        }
    }

    info!("stdio transport closed (stdin EOF)");
    Ok(())
}
