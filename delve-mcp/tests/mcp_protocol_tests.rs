//! Misbehaving-client MCP integration tests.
//!
//! Drives a full `McpServer` over `ChannelTransport` and checks that bad
//! input is answered with the right JSON-RPC error and never reaches the
//! research engine.

use delve_core::brain::{Generator, MockLlmProvider};
use delve_core::config::ResearchConfig;
use delve_core::research::DeepResearch;
use delve_core::search::MockSearchProvider;
use delve_mcp::McpServer;
use delve_mcp::protocol::{JsonRpcResponse, MCP_PROTOCOL_VERSION, RequestId};
use delve_mcp::transport::{ChannelTransport, Transport};
use serde_json::{Value, json};
use std::sync::Arc;

fn setup() -> (McpServer, Arc<MockLlmProvider>, Arc<MockSearchProvider>) {
    let llm = Arc::new(MockLlmProvider::new());
    let search = Arc::new(MockSearchProvider::new());
    let research = DeepResearch::new(
        Generator::new(llm.clone()),
        search.clone(),
        ResearchConfig::default(),
    );
    (McpServer::new(Arc::new(research)), llm, search)
}

fn init_request(id: i64) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "misbehaving-client", "version": "1.0"}
        }
    })
    .to_string()
}

fn tool_call(id: Value, name: &str, args: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": name, "arguments": args}
    })
    .to_string()
}

async fn roundtrip(client: &mut ChannelTransport, message: &str) -> JsonRpcResponse {
    client.write_message(message).await.unwrap();
    let raw = client.read_message().await.unwrap().unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[tokio::test]
async fn test_tool_call_before_initialize_is_rejected() {
    let (mut server, llm, _search) = setup();
    let (mut client, mut transport) = ChannelTransport::pair(16);
    let handle = tokio::spawn(async move { server.run(&mut transport).await });

    let resp = roundtrip(
        &mut client,
        &tool_call(json!(1), "deep-research", json!({"query": "q", "depth": 1, "breadth": 1})),
    )
    .await;
    assert_eq!(resp.error.unwrap().code, -32003);
    assert_eq!(llm.call_count(), 0);

    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_out_of_range_arguments_never_reach_research() {
    let (mut server, llm, search) = setup();
    let (mut client, mut transport) = ChannelTransport::pair(16);
    let handle = tokio::spawn(async move { server.run(&mut transport).await });
    roundtrip(&mut client, &init_request(1)).await;

    for (i, args) in [
        json!({"query": "q", "depth": 6, "breadth": 1}),
        json!({"query": "q", "depth": 1, "breadth": 1, "tokenBudget": "lots"}),
        json!({"query": 42, "depth": 1, "breadth": 1}),
        json!({"query": "q", "depth": 1, "breadth": 1, "existingLearnings": "not a list"}),
    ]
    .into_iter()
    .enumerate()
    {
        let resp = roundtrip(&mut client, &tool_call(json!(i + 2), "deep-research", args)).await;
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
    }
    assert_eq!(llm.call_count(), 0);
    assert_eq!(search.call_count(), 0);

    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unknown_tool_is_invalid_params() {
    let (mut server, _llm, _search) = setup();
    let (mut client, mut transport) = ChannelTransport::pair(16);
    let handle = tokio::spawn(async move { server.run(&mut transport).await });
    roundtrip(&mut client, &init_request(1)).await;

    let resp = roundtrip(&mut client, &tool_call(json!("abc"), "shell_exec", json!({}))).await;
    assert_eq!(resp.id, RequestId::String("abc".into()));
    assert_eq!(resp.error.unwrap().code, -32602);

    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_malformed_line_does_not_stop_server() {
    let (mut server, _llm, _search) = setup();
    let (mut client, mut transport) = ChannelTransport::pair(16);
    let handle = tokio::spawn(async move { server.run(&mut transport).await });

    let resp = roundtrip(&mut client, "{\"jsonrpc\": \"2.0\", \"id\": ").await;
    assert_eq!(resp.id, RequestId::Null);
    assert_eq!(resp.error.unwrap().code, -32700);

    let resp = roundtrip(
        &mut client,
        &json!({"jsonrpc": "2.0", "id": 9, "method": "ping"}).to_string(),
    )
    .await;
    assert_eq!(resp.id, RequestId::Number(9));
    assert_eq!(resp.result.unwrap(), json!({}));

    drop(client);
    handle.await.unwrap().unwrap();
}
