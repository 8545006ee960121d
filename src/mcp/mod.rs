// MCP server over stdio: one JSON-RPC message per line in, one response
// per line out. Logging must go to stderr while this runs.

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub mod protocol;
pub mod tools;

use crate::store::CatalogStore;
use protocol::{
    methods, InitializeResult, McpError, McpRequest, McpResponse, ServerCapabilities, ServerInfo,
    ToolsCallParams, ToolsCapability, ToolsListResult, MCP_PROTOCOL_VERSION,
};

pub const SERVER_NAME: &str = "movie-catalog-mcp";

pub struct McpServer {
    store: Arc<dyn CatalogStore>,
    initialized: bool,
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::InternalError(e.to_string()))
}

impl McpServer {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            initialized: false,
        }
    }

    /// Handle one raw message. Notifications produce no response.
    pub async fn handle_message(&mut self, text: &str) -> Option<McpResponse> {
        let request: McpRequest = match serde_json::from_str(text) {
            Ok(req) => req,
            Err(e) => {
                return Some(McpResponse::error(
                    None,
                    McpError::ParseError(e.to_string()),
                ))
            }
        };

        let Some(id) = request.id.clone() else {
            tracing::debug!("MCP notification: {}", request.method);
            return None;
        };

        let result = match request.method.as_str() {
            methods::INITIALIZE => self.initialize(),
            methods::PING => Ok(Value::Object(Default::default())),
            methods::INITIALIZED => return None,
            methods::TOOLS_LIST | methods::TOOLS_CALL if !self.initialized => {
                Err(McpError::InvalidRequest("Not initialized".to_string()))
            }
            methods::TOOLS_LIST => to_value(ToolsListResult {
                tools: tools::definitions(),
            }),
            methods::TOOLS_CALL => self.tools_call(&request).await,
            other => Err(McpError::MethodNotFound(other.to_string())),
        };

        Some(match result {
            Ok(value) => McpResponse::success(Some(id), value),
            Err(error) => McpResponse::error(Some(id), error),
        })
    }

    fn initialize(&mut self) -> Result<Value, McpError> {
        self.initialized = true;
        to_value(InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        })
    }

    async fn tools_call(&self, request: &McpRequest) -> Result<Value, McpError> {
        let params: ToolsCallParams = request
            .params
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Missing params".to_string()))?;

        tracing::debug!("MCP tool call: {}", params.name);
        let arguments = params.arguments.unwrap_or(Value::Null);
        let result = tools::call(self.store.as_ref(), &params.name, arguments).await?;
        to_value(result)
    }

    /// Serve until the input closes.
    pub async fn serve<R, W>(&mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_message(&line).await {
                let mut json = serde_json::to_string(&response)?;
                json.push('\n');
                writer.write_all(json.as_bytes()).await?;
                writer.flush().await?;
            }
        }

        tracing::info!("MCP input closed, shutting down");
        Ok(())
    }

    pub async fn serve_stdio(&mut self) -> Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.serve(stdin, tokio::io::stdout()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_store;
    use serde_json::json;

    fn rpc(id: i64, method: &str, params: Value) -> String {
        json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string()
    }

    #[tokio::test]
    async fn test_tools_require_initialize() {
        let mut server = McpServer::new(memory_store().await);

        let resp = server
            .handle_message(&rpc(1, "tools/list", Value::Null))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, -32600);

        let resp = server
            .handle_message(&rpc(2, "initialize", json!({})))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);

        let resp = server
            .handle_message(&rpc(3, "tools/list", Value::Null))
            .await
            .unwrap();
        assert_eq!(resp.result.unwrap()["tools"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_notifications_and_garbage() {
        let mut server = McpServer::new(memory_store().await);

        let note = json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string();
        assert!(server.handle_message(&note).await.is_none());

        let resp = server.handle_message("{not json").await.unwrap();
        assert!(resp.id.is_none());
        assert_eq!(resp.error.unwrap().code, -32700);

        let resp = server
            .handle_message(&rpc(9, "resources/list", Value::Null))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_serve_line_protocol() {
        let mut server = McpServer::new(memory_store().await);
        let input = [
            rpc(1, "initialize", json!({})),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string(),
            rpc(
                2,
                "tools/call",
                json!({"name": "createItem", "arguments": {"title": "Heat"}}),
            ),
            rpc(3, "tools/call", json!({"name": "listItems", "arguments": {}})),
        ]
        .join("\n");

        let mut output = Vec::new();
        server
            .serve(tokio::io::BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[2]["id"], 3);

        let text = responses[2]["result"]["content"][0]["text"].as_str().unwrap();
        let items: Value = serde_json::from_str(text).unwrap();
        assert_eq!(items[0]["title"], "Heat");
    }
}
