//! MCP request handlers: route JSON-RPC methods and run the research tool.

use crate::error::McpError;
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcNotification,
    ListToolsResult, MCP_PROTOCOL_VERSION, McpTool, ServerCapabilities, ServerInfo,
    ToolsCapability,
};
use async_trait::async_trait;
use delve_core::research::{
    DeepResearch, NoOpProgress, ProgressSink, ResearchOptions, ResearchOutcome, ResearchProgress,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Name of the single tool this server exposes.
pub const TOOL_NAME: &str = "deep-research";

/// Outbound channel for notifications emitted while a request is running.
pub type Notifier = mpsc::UnboundedSender<JsonRpcNotification>;

/// JSON schema of the `deep-research` arguments.
pub fn input_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "minLength": 1,
                "description": "The research query to investigate"
            },
            "depth": {
                "type": "integer",
                "minimum": 1,
                "maximum": 5,
                "description": "How deep to go in the research tree (1-5)"
            },
            "breadth": {
                "type": "integer",
                "minimum": 1,
                "maximum": 5,
                "description": "How broad to make each research level (1-5)"
            },
            "model": {
                "type": "string",
                "description": "Model specifier, e.g. \"openai:gpt-4o\" or \"anthropic/claude-sonnet-4\""
            },
            "tokenBudget": {
                "type": "integer",
                "minimum": 1,
                "description": "Optional soft cap on total research-phase tokens"
            },
            "sourcePreferences": {
                "type": "string",
                "description": "Sources to avoid, e.g. \"avoid SEO listicles and affiliate reviews\""
            },
            "existingLearnings": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Findings from earlier research to build on"
            }
        },
        "required": ["query", "depth", "breadth"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeepResearchArgs {
    query: String,
    depth: usize,
    breadth: usize,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    token_budget: Option<u64>,
    #[serde(default)]
    source_preferences: Option<String>,
    #[serde(default)]
    existing_learnings: Vec<String>,
}

/// Forwards progress as `notifications/message`, skipping repeats of the
/// previous message.
struct NotificationProgress {
    notifier: Notifier,
    last: Mutex<Option<String>>,
}

#[async_trait]
impl ProgressSink for NotificationProgress {
    async fn on_progress(&self, progress: &ResearchProgress) -> anyhow::Result<()> {
        let message = progress.message();
        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if last.as_deref() == Some(message.as_str()) {
                return Ok(());
            }
            *last = Some(message.clone());
        }
        self.notifier
            .send(JsonRpcNotification::log_message(message))
            .map_err(|_| anyhow::anyhow!("notification channel closed"))
    }
}

/// Routes MCP requests to the research engine.
pub struct RequestHandler {
    research: Arc<DeepResearch>,
    initialized: bool,
    server_info: ServerInfo,
    notifier: Option<Notifier>,
}

impl RequestHandler {
    pub fn new(research: Arc<DeepResearch>) -> Self {
        Self {
            research,
            initialized: false,
            server_info: ServerInfo {
                name: "delve".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            notifier: None,
        }
    }

    /// Skip the handshake, for stateless transports.
    pub fn preinitialized(mut self) -> Self {
        self.initialized = true;
        self
    }

    /// Send progress notifications through `notifier` during tool calls.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn handle_initialize(&mut self, params: InitializeParams) -> Result<Value, McpError> {
        info!(
            client = %params.client_info.name,
            client_version = ?params.client_info.version,
            protocol_version = %params.protocol_version,
            "MCP client connecting"
        );
        self.initialized = true;

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
                logging: Some(json!({})),
            },
            server_info: self.server_info.clone(),
        };
        Ok(serde_json::to_value(result)?)
    }

    pub fn handle_tools_list(&self) -> Result<Value, McpError> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }
        let result = ListToolsResult {
            tools: vec![McpTool {
                name: TOOL_NAME.to_string(),
                description: Some(
                    "Perform deep research on a topic using AI-powered web search, reliability \
                     scoring and recursive follow-up, then write a detailed report"
                        .to_string(),
                ),
                input_schema: input_schema(),
            }],
        };
        Ok(serde_json::to_value(result)?)
    }

    /// Run `deep-research`.
    ///
    /// Invalid arguments and research failures come back as an `isError`
    /// result, not a JSON-RPC error.
    pub async fn handle_tools_call(&self, params: CallToolParams) -> Result<Value, McpError> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }
        if params.name != TOOL_NAME {
            return Err(McpError::ToolNotFound { name: params.name });
        }

        let arguments = params
            .arguments
            .unwrap_or(Value::Object(Default::default()));
        debug!(args = %arguments, "Tool call arguments");

        let result = match parse_arguments(&arguments)? {
            Ok(args) => self.run_tool(args).await,
            Err(message) => {
                warn!(error = %message, "Rejected deep-research arguments");
                CallToolResult::error(message)
            }
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn run_tool(&self, args: DeepResearchArgs) -> CallToolResult {
        info!(
            query = %args.query,
            depth = args.depth,
            breadth = args.breadth,
            model = args.model.as_deref().unwrap_or("default"),
            "Starting deep research via MCP"
        );
        let progress: Arc<dyn ProgressSink> = match &self.notifier {
            Some(notifier) => Arc::new(NotificationProgress {
                notifier: notifier.clone(),
                last: Mutex::new(None),
            }),
            None => Arc::new(NoOpProgress),
        };
        let options = ResearchOptions::new(args.breadth, args.depth)
            .with_token_budget(args.token_budget)
            .with_source_preferences(args.source_preferences)
            .with_model(args.model.clone())
            .with_existing_learnings(args.existing_learnings);

        let outcome = match self
            .research
            .run_research(&args.query, options, progress)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Deep research failed");
                return CallToolResult::error(format!("Error performing research: {e}"));
            }
        };

        match self
            .research
            .compose_report(
                &outcome.query,
                &outcome.result.findings,
                &outcome.result.sources,
                args.model.as_deref(),
            )
            .await
        {
            Ok(report) => CallToolResult::text(report).with_metadata(metadata(&outcome)),
            Err(e) => {
                warn!(error = %e, "Report generation failed");
                CallToolResult::error(format!("Error performing research: {e}"))
            }
        }
    }

    /// Route a JSON-RPC method to its handler.
    pub async fn route(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        match method {
            "initialize" => {
                let init: InitializeParams =
                    serde_json::from_value(params).map_err(|e| McpError::InvalidParams {
                        message: format!("Invalid initialize params: {e}"),
                    })?;
                self.handle_initialize(init)
            }
            "notifications/initialized" => {
                info!("MCP client initialized");
                Ok(Value::Null)
            }
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => {
                let call: CallToolParams =
                    serde_json::from_value(params).map_err(|e| McpError::InvalidParams {
                        message: format!("Invalid tools/call params: {e}"),
                    })?;
                self.handle_tools_call(call).await
            }
            _ => Err(McpError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }
}

/// Validate and decode tool arguments. The inner `Err` is a user-facing
/// validation message.
fn parse_arguments(arguments: &Value) -> Result<Result<DeepResearchArgs, String>, McpError> {
    let schema = input_schema();
    let validator = jsonschema::validator_for(&schema).map_err(|e| McpError::InternalError {
        message: format!("invalid tool schema: {e}"),
    })?;
    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| format!("{} at '{}'", e, e.instance_path))
        .collect();
    if !errors.is_empty() {
        return Ok(Err(format!("Invalid arguments: {}", errors.join("; "))));
    }
    Ok(serde_json::from_value(arguments.clone())
        .map_err(|e| format!("Invalid arguments: {e}")))
}

fn metadata(outcome: &ResearchOutcome) -> Value {
    json!({
        "learnings": outcome.result.learnings(),
        "visitedUrls": outcome.result.visited_urls,
        "stats": {
            "totalLearnings": outcome.stats.total_findings,
            "totalSources": outcome.stats.unique_sources,
            "averageReliability": outcome.stats.average_reliability,
            "tokensUsed": outcome.stats.tokens_used,
            "budgetExhausted": outcome.stats.budget_exhausted
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClientInfo;
    use crate::testing::{research_with, scripted_llm};
    use delve_core::brain::MockLlmProvider;
    use delve_core::error::LlmError;

    fn init_params() -> InitializeParams {
        InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: ClientInfo {
                name: "test-client".to_string(),
                version: Some("1.0".to_string()),
            },
        }
    }

    fn call(arguments: Value) -> CallToolParams {
        CallToolParams {
            name: TOOL_NAME.to_string(),
            arguments: Some(arguments),
        }
    }

    #[test]
    fn test_initialize() {
        let (research, _llm) = research_with(scripted_llm());
        let mut handler = RequestHandler::new(research);
        assert!(!handler.is_initialized());

        let result = handler.handle_initialize(init_params()).unwrap();
        assert!(handler.is_initialized());
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "delve");
        assert!(result["capabilities"]["tools"].is_object());
        assert!(result["capabilities"]["logging"].is_object());
    }

    #[test]
    fn test_tools_list_requires_initialize() {
        let (research, _llm) = research_with(scripted_llm());
        let handler = RequestHandler::new(research);
        assert!(matches!(
            handler.handle_tools_list().unwrap_err(),
            McpError::NotInitialized
        ));
    }

    #[test]
    fn test_tools_list_single_tool() {
        let (research, _llm) = research_with(scripted_llm());
        let handler = RequestHandler::new(research).preinitialized();
        let result = handler.handle_tools_list().unwrap();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], TOOL_NAME);
        assert_eq!(
            tools[0]["inputSchema"]["required"],
            json!(["query", "depth", "breadth"])
        );
    }

    #[tokio::test]
    async fn test_invalid_arguments_skip_research() {
        let (research, llm) = research_with(scripted_llm());
        let handler = RequestHandler::new(research).preinitialized();

        for args in [
            json!({"query": "printing press", "depth": 2, "breadth": 9}),
            json!({"query": "", "depth": 1, "breadth": 1}),
            json!({"depth": 1, "breadth": 1}),
            json!({"query": "q", "depth": 0, "breadth": 1}),
        ] {
            let result = handler.handle_tools_call(call(args)).await.unwrap();
            assert_eq!(result["isError"], true);
            assert!(
                result["content"][0]["text"]
                    .as_str()
                    .unwrap()
                    .starts_with("Invalid arguments")
            );
        }
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (research, _llm) = research_with(scripted_llm());
        let handler = RequestHandler::new(research).preinitialized();
        let err = handler
            .handle_tools_call(CallToolParams {
                name: "web-search".into(),
                arguments: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_successful_call_returns_report_and_metadata() {
        let (research, _llm) = research_with(scripted_llm());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = RequestHandler::new(research)
            .preinitialized()
            .with_notifier(tx);

        let result = handler
            .handle_tools_call(call(json!({
                "query": "history of the printing press",
                "depth": 1,
                "breadth": 2,
                "tokenBudget": 100000
            })))
            .await
            .unwrap();

        assert!(result.get("isError").is_none());
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("# The Printing Press"));
        assert!(text.contains("## Sources"));
        let metadata = &result["metadata"];
        assert!(!metadata["learnings"].as_array().unwrap().is_empty());
        assert_eq!(metadata["visitedUrls"].as_array().unwrap().len(), 1);
        assert_eq!(metadata["stats"]["totalSources"], 1);
        assert_eq!(metadata["stats"]["budgetExhausted"], false);

        let mut messages = Vec::new();
        while let Ok(note) = rx.try_recv() {
            assert_eq!(note.method, "notifications/message");
            messages.push(note.params.unwrap()["data"].as_str().unwrap().to_string());
        }
        assert!(!messages.is_empty());
        assert!(messages[0].starts_with("Depth 1/1, Query 0/"));
        assert!(messages.windows(2).all(|w| w[0] != w[1]));
    }

    #[tokio::test]
    async fn test_research_failure_is_error_result() {
        let llm = Arc::new(MockLlmProvider::with_handler(|_| {
            Err(LlmError::AuthFailed {
                provider: "openai".into(),
            })
        }));
        let (research, _llm) = research_with(llm);
        let handler = RequestHandler::new(research).preinitialized();
        let result = handler
            .handle_tools_call(call(json!({"query": "q", "depth": 1, "breadth": 1})))
            .await
            .unwrap();
        assert_eq!(result["isError"], true);
        assert!(
            result["content"][0]["text"]
                .as_str()
                .unwrap()
                .contains("Authentication failed")
        );
    }

    #[tokio::test]
    async fn test_route_ping_and_unknown() {
        let (research, _llm) = research_with(scripted_llm());
        let mut handler = RequestHandler::new(research);
        assert_eq!(handler.route("ping", Value::Null).await.unwrap(), json!({}));
        assert!(matches!(
            handler.route("resources/list", Value::Null).await.unwrap_err(),
            McpError::MethodNotFound { .. }
        ));
        assert!(matches!(
            handler.route("initialize", json!({"bad": true})).await.unwrap_err(),
            McpError::InvalidParams { .. }
        ));
    }
}
