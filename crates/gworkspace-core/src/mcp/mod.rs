//! MCP (Model Context Protocol) server implementation
//!
//! Provides a stdio JSON-RPC interface exposing the read-only Workspace tools.

mod protocol;
mod tools;

pub use protocol::*;
pub use tools::*;

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::google::Workspace;

/// MCP protocol revision we speak
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// MCP Server for Google Workspace
pub struct McpServer {
    workspace: Arc<Workspace>,
}

impl McpServer {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }

    /// Run the MCP server on stdio
    pub async fn run(&self) -> Result<()> {
        info!("Starting MCP server on stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve newline-delimited JSON-RPC until `reader` hits EOF
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;

            if n == 0 {
                debug!("Received EOF, shutting down");
                break;
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            debug!("Received request: {}", line);

            let response = match serde_json::from_str::<JsonRpcRequest>(line) {
                Ok(request) => {
                    let response = self.handle_request(&request).await;
                    if request.is_notification() {
                        continue;
                    }
                    response
                }
                Err(e) => JsonRpcResponse::failure(
                    None,
                    JsonRpcError {
                        code: PARSE_ERROR,
                        message: format!("Parse error: {}", e),
                        data: None,
                    },
                ),
            };

            let response_json = serde_json::to_string(&response)?;
            debug!("Sending response: {}", response_json);
            writer.write_all(response_json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        Ok(())
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let start = std::time::Instant::now();
        let method = &request.method;

        let request_desc = match (method.as_str(), &request.params) {
            ("tools/call", Some(params)) => {
                format!("tools/call:{}", params["name"].as_str().unwrap_or("unknown"))
            }
            _ => method.clone(),
        };

        info!("→ {}", request_desc);

        let result = match method.as_str() {
            "initialize" => self.handle_initialize(),
            "initialized" | "notifications/initialized" => Ok(Value::Null),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": get_tool_definitions() })),
            "tools/call" => self.handle_tools_call(&request.params).await,
            _ => Err(Error::McpProtocol(format!("Unknown method: {}", method))),
        };

        let elapsed_ms = start.elapsed().as_millis();

        match result {
            Ok(value) => {
                if elapsed_ms > 1000 {
                    warn!("← {} OK ({}ms) SLOW", request_desc, elapsed_ms);
                } else {
                    info!("← {} OK ({}ms)", request_desc, elapsed_ms);
                }
                JsonRpcResponse::success(request.id.clone(), value)
            }
            Err(e) => {
                error!("← {} ERROR ({}ms): {}", request_desc, elapsed_ms, e);
                JsonRpcResponse::failure(
                    request.id.clone(),
                    JsonRpcError {
                        code: SERVER_ERROR,
                        message: e.to_string(),
                        data: Some(json!({
                            "code": e.mcp_code(),
                            "action": e.action_hint()
                        })),
                    },
                )
            }
        }
    }

    fn handle_initialize(&self) -> Result<Value> {
        Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": crate::APP_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": {}
            }
        }))
    }

    async fn handle_tools_call(&self, params: &Option<Value>) -> Result<Value> {
        let params = params
            .as_ref()
            .ok_or_else(|| Error::InvalidRequest("Missing params".to_string()))?;

        let name = params["name"]
            .as_str()
            .ok_or_else(|| Error::InvalidRequest("Missing tool name".to_string()))?;

        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(Value::Object(Default::default()));

        ToolHandler::new(self.workspace.clone())
            .execute(name, &arguments)
            .await
    }
}
