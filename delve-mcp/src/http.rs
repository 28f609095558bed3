//! Stateless HTTP front end for the MCP server, built on axum.
//!
//! `POST /mcp` handles one JSON-RPC message with a fresh, pre-initialized
//! handler. Progress notifications are not streamed over HTTP.

use crate::error::{McpError, codes};
use crate::handlers::RequestHandler;
use crate::process_message;
use crate::protocol::{JsonRpcResponse, RequestId};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use delve_core::research::DeepResearch;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    research: Arc<DeepResearch>,
}

/// Build the router with the `/mcp` endpoint.
pub fn router(research: Arc<DeepResearch>) -> Router {
    Router::new()
        .route(
            "/mcp",
            post(handle_post)
                .get(method_not_allowed)
                .delete(method_not_allowed),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(HttpState { research })
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(research: Arc<DeepResearch>, addr: SocketAddr) -> Result<(), McpError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "MCP HTTP server listening");
    axum::serve(listener, router(research)).await?;
    Ok(())
}

async fn handle_post(State(state): State<HttpState>, body: String) -> Response {
    let mut handler = RequestHandler::new(state.research).preinitialized();
    match process_message(&mut handler, &body).await {
        Ok(Some(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(e @ (McpError::ParseError { .. } | McpError::InvalidRequest { .. })) => (
            StatusCode::BAD_REQUEST,
            Json(JsonRpcResponse::from_mcp_error(RequestId::Null, e)),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Error handling MCP request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(JsonRpcResponse::error(
                    RequestId::Null,
                    codes::INTERNAL_ERROR,
                    "Internal server error",
                )),
            )
                .into_response()
        }
    }
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(JsonRpcResponse::from_mcp_error(
            RequestId::Null,
            McpError::MethodNotAllowed,
        )),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{research_with, scripted_llm};
    use axum::body::Body;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app() -> Router {
        let (research, _llm) = research_with(scripted_llm());
        router(research)
    }

    async fn send(method: &str, body: Body) -> (StatusCode, Option<Value>) {
        let req = axum::http::Request::builder()
            .method(method)
            .uri("/mcp")
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = ServiceExt::<axum::http::Request<Body>>::oneshot(app(), req)
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1_000_000)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).ok())
    }

    #[tokio::test]
    async fn test_post_is_preinitialized() {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}).to_string();
        let (status, json) = send("POST", Body::from(body)).await;
        assert_eq!(status, StatusCode::OK);
        let json = json.unwrap();
        assert_eq!(json["result"]["tools"][0]["name"], "deep-research");
    }

    #[tokio::test]
    async fn test_post_tool_call() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "call-1",
            "method": "tools/call",
            "params": {
                "name": "deep-research",
                "arguments": {"query": "history of the printing press", "depth": 1, "breadth": 1}
            }
        })
        .to_string();
        let (status, json) = send("POST", Body::from(body)).await;
        assert_eq!(status, StatusCode::OK);
        let json = json.unwrap();
        assert_eq!(json["id"], "call-1");
        assert!(
            json["result"]["content"][0]["text"]
                .as_str()
                .unwrap()
                .starts_with("# The Printing Press")
        );
    }

    #[tokio::test]
    async fn test_post_notification_accepted() {
        let body = json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string();
        let (status, json) = send("POST", Body::from(body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(json.is_none());
    }

    #[tokio::test]
    async fn test_post_malformed_body() {
        let (status, json) = send("POST", Body::from("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json.unwrap()["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_get_and_delete_not_allowed() {
        for method in ["GET", "DELETE"] {
            let (status, json) = send(method, Body::empty()).await;
            assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
            let json = json.unwrap();
            assert_eq!(json["error"]["code"], -32000);
            assert_eq!(json["error"]["message"], "Method not allowed.");
            assert_eq!(json["id"], Value::Null);
        }
    }
}
