//! # Delve MCP
//!
//! Model Context Protocol (MCP) server exposing Delve's deep research as a
//! single tool, `deep-research`, over JSON-RPC 2.0 on stdio or HTTP.
//!
//! ## Architecture
//!
//! ```text
//! Client <-> Transport (stdio/channel) <-> McpServer <-> RequestHandler <-> DeepResearch
//!                                             ^                |
//!                                             +-- progress notifications
//! ```

pub mod error;
pub mod handlers;
pub mod http;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod testing;

use delve_core::research::DeepResearch;
use error::McpError;
use handlers::RequestHandler;
use protocol::{IncomingMessage, JsonRpcNotification, JsonRpcResponse, RequestId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use transport::Transport;

/// Processes JSON-RPC messages from a transport until EOF.
pub struct McpServer {
    handler: RequestHandler,
    notifications: mpsc::UnboundedReceiver<JsonRpcNotification>,
}

impl McpServer {
    pub fn new(research: Arc<DeepResearch>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            handler: RequestHandler::new(research).with_notifier(tx),
            notifications: rx,
        }
    }

    /// Serve until the transport closes.
    ///
    /// Notifications raised while a request is being handled are written to
    /// the transport as they arrive, ahead of that request's response.
    pub async fn run<T: Transport>(&mut self, transport: &mut T) -> Result<(), McpError> {
        info!("MCP server starting");

        loop {
            let message = match transport.read_message().await {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    info!("Transport closed (EOF), shutting down MCP server");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Transport read error");
                    break;
                }
            };
            if message.trim().is_empty() {
                continue;
            }
            debug!(message = %message, "Received MCP message");

            let outcome = {
                let Self {
                    handler,
                    notifications,
                } = self;
                let processing = process_message(handler, &message);
                tokio::pin!(processing);
                loop {
                    tokio::select! {
                        outcome = &mut processing => break outcome,
                        Some(note) = notifications.recv() => send_notification(transport, &note).await,
                    }
                }
            };
            while let Ok(note) = self.notifications.try_recv() {
                send_notification(transport, &note).await;
            }

            let response = match outcome {
                Ok(Some(response)) => response,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "Error processing MCP message");
                    JsonRpcResponse::from_mcp_error(RequestId::Null, e)
                }
            };
            let json = serde_json::to_string(&response).map_err(|e| McpError::InternalError {
                message: format!("Failed to serialize response: {e}"),
            })?;
            debug!(response = %json, "Sending MCP response");
            transport.write_message(&json).await?;
        }

        transport.close().await?;
        info!("MCP server stopped");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.handler.is_initialized()
    }
}

/// Handle one raw message. `Ok(None)` for notifications.
pub(crate) async fn process_message(
    handler: &mut RequestHandler,
    raw: &str,
) -> Result<Option<JsonRpcResponse>, McpError> {
    let incoming: IncomingMessage =
        serde_json::from_str(raw).map_err(|e| McpError::ParseError {
            message: format!("Invalid JSON-RPC message: {e}"),
        })?;
    if incoming.jsonrpc != "2.0" {
        return Err(McpError::InvalidRequest {
            message: format!("Expected jsonrpc version 2.0, got: {}", incoming.jsonrpc),
        });
    }

    match incoming.id {
        None => {
            debug!(method = %incoming.method, "Processing notification");
            if let Err(e) = handler.route(&incoming.method, incoming.params).await {
                warn!(method = %incoming.method, error = %e, "Notification handler error");
            }
            Ok(None)
        }
        Some(id) => {
            debug!(method = %incoming.method, "Processing request");
            Ok(Some(
                match handler.route(&incoming.method, incoming.params).await {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(e) => JsonRpcResponse::from_mcp_error(id, e),
                },
            ))
        }
    }
}

async fn send_notification<T: Transport>(transport: &mut T, note: &JsonRpcNotification) {
    let json = match serde_json::to_string(note) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to serialize notification");
            return;
        }
    };
    if let Err(e) = transport.write_message(&json).await {
        warn!(error = %e, "Failed to send notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MCP_PROTOCOL_VERSION;
    use crate::testing::{research_with, scripted_llm};
    use crate::transport::ChannelTransport;
    use serde_json::{Value, json};

    fn server() -> McpServer {
        let (research, _llm) = research_with(scripted_llm());
        McpServer::new(research)
    }

    fn init_request(id: i64) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "1.0"}
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_process_invalid_json() {
        let mut server = server();
        assert!(matches!(
            process_message(&mut server.handler, "not json").await,
            Err(McpError::ParseError { .. })
        ));
    }

    #[tokio::test]
    async fn test_process_wrong_version() {
        let mut server = server();
        let raw = json!({"jsonrpc": "1.0", "id": 1, "method": "ping"}).to_string();
        assert!(matches!(
            process_message(&mut server.handler, &raw).await,
            Err(McpError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_notification_has_no_response() {
        let mut server = server();
        let raw = json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string();
        assert!(
            process_message(&mut server.handler, &raw)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_run_with_channel_transport() {
        let mut server = server();
        let (mut client, mut server_transport) = ChannelTransport::pair(64);
        let handle = tokio::spawn(async move {
            server.run(&mut server_transport).await.unwrap();
            server
        });

        client.write_message(&init_request(1)).await.unwrap();
        let resp: JsonRpcResponse =
            serde_json::from_str(&client.read_message().await.unwrap().unwrap()).unwrap();
        assert_eq!(resp.id, RequestId::Number(1));
        assert_eq!(
            resp.result.unwrap()["protocolVersion"],
            MCP_PROTOCOL_VERSION
        );

        client
            .write_message(
                &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string(),
            )
            .await
            .unwrap();

        let call = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {
                "name": "deep-research",
                "arguments": {"query": "history of the printing press", "depth": 1, "breadth": 2}
            }
        });
        client.write_message(&call.to_string()).await.unwrap();

        let mut progress = Vec::new();
        let response = loop {
            let raw = client.read_message().await.unwrap().unwrap();
            let value: Value = serde_json::from_str(&raw).unwrap();
            if value.get("id").is_some() {
                break value;
            }
            assert_eq!(value["method"], "notifications/message");
            progress.push(value["params"]["data"].as_str().unwrap().to_string());
        };
        assert_eq!(response["id"], 2);
        assert!(
            response["result"]["content"][0]["text"]
                .as_str()
                .unwrap()
                .contains("## Sources")
        );
        assert!(!progress.is_empty());

        client
            .write_message(&json!({"jsonrpc": "2.0", "id": 3, "method": "bogus"}).to_string())
            .await
            .unwrap();
        let resp: JsonRpcResponse =
            serde_json::from_str(&client.read_message().await.unwrap().unwrap()).unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);

        drop(client);
        let server = handle.await.unwrap();
        assert!(server.is_initialized());
    }
}
