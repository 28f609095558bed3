//! Brain module: LLM provider abstraction and structured generation.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions, the
//! `Generator` that turns a completion into a schema-validated object, and
//! token counting / prompt trimming helpers.

use crate::config::RetryConfig;
use crate::error::LlmError;
use crate::providers::with_retry;
use crate::types::{CompletionRequest, CompletionResponse, Message, TokenUsage};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use tracing::{debug, warn};

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Return the provider name used in logs and errors.
    fn provider_name(&self) -> &str {
        "openai"
    }
}

/// Smallest prefix `trim_prompt` will cut a non-empty text down to.
pub const MIN_CHUNK_CHARS: usize = 140;

static O200K: LazyLock<tiktoken_rs::CoreBPE> =
    LazyLock::new(|| tiktoken_rs::o200k_base().expect("o200k_base should be available"));

/// Token counter using the o200k BPE, shared across the process.
#[derive(Clone, Copy)]
pub struct TokenCounter {
    bpe: &'static tiktoken_rs::CoreBPE,
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter {
    pub fn new() -> Self {
        Self { bpe: &O200K }
    }

    /// Count the number of tokens in a string.
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Trim `text` until it fits in `max_tokens`.
    ///
    /// Estimates roughly three characters per overflowing token, cuts at the
    /// last paragraph, line, sentence, or word boundary before that point,
    /// and repeats until the text fits. Never cuts a non-empty text below
    /// `MIN_CHUNK_CHARS` characters.
    pub fn trim(&self, text: &str, max_tokens: usize) -> String {
        let mut current = text;
        loop {
            if current.is_empty() {
                return String::new();
            }
            let tokens = self.count(current);
            if tokens <= max_tokens {
                return current.to_string();
            }

            let overflow = tokens - max_tokens;
            let chars = current.chars().count();
            let chunk = chars.saturating_sub(overflow.saturating_mul(3));
            if chunk < MIN_CHUNK_CHARS {
                return current.chars().take(MIN_CHUNK_CHARS).collect();
            }

            let end = char_offset(current, chunk);
            let floor = (end / 2).max(char_offset(current, MIN_CHUNK_CHARS));
            current = &current[..natural_cut(&current[..end], floor)];
        }
    }
}

/// Byte offset of the `n`th character, or the text length.
fn char_offset(text: &str, n: usize) -> usize {
    text.char_indices()
        .nth(n)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

/// Byte offset of the last natural boundary in `prefix` at or after `floor`,
/// preferring larger separators.
fn natural_cut(prefix: &str, floor: usize) -> usize {
    for sep in ["\n\n", "\n", ". ", " "] {
        if let Some(pos) = prefix.rfind(sep)
            && pos >= floor
        {
            return pos;
        }
    }
    prefix.len()
}

/// Trim a prompt to a token budget with the shared counter.
pub fn trim_prompt(text: &str, max_tokens: usize) -> String {
    TokenCounter::new().trim(text, max_tokens)
}

/// A schema-validated object plus the usage of the call that produced it.
#[derive(Debug, Clone)]
pub struct Generated<T> {
    pub object: T,
    pub usage: TokenUsage,
}

/// Produces typed objects from a provider, validated against a JSON schema.
#[derive(Clone)]
pub struct Generator {
    provider: Arc<dyn LlmProvider>,
    retry: RetryConfig,
    temperature: f32,
    max_tokens: Option<usize>,
}

impl Generator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            retry: RetryConfig::default(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Ask the model for an object matching `schema` and deserialize it.
    ///
    /// Transient provider errors are retried; a reply that does not parse or
    /// does not validate fails with `ResponseParse` / `SchemaValidation`.
    pub async fn generate_object<T: DeserializeOwned>(
        &self,
        system: &str,
        prompt: &str,
        schema: &serde_json::Value,
    ) -> Result<Generated<T>, LlmError> {
        let validator =
            jsonschema::validator_for(schema).map_err(|e| LlmError::SchemaValidation {
                errors: vec![format!("invalid schema: {e}")],
            })?;

        let user = format!(
            "{prompt}\n\nRespond with only a JSON object that conforms to this JSON schema:\n{}",
            serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string())
        );
        let request = CompletionRequest {
            messages: vec![Message::system(system), Message::user(user)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            model: None,
            json_mode: true,
        };

        let response = with_retry(&self.retry, || self.provider.complete(request.clone())).await?;
        debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Structured generation complete"
        );

        let value = extract_json(response.text())?;
        let errors: Vec<String> = validator
            .iter_errors(&value)
            .map(|e| format!("{} at '{}'", e, e.instance_path))
            .collect();
        if !errors.is_empty() {
            warn!(errors = errors.len(), "Generated object failed schema validation");
            return Err(LlmError::SchemaValidation { errors });
        }

        let object = serde_json::from_value(value).map_err(|e| LlmError::ResponseParse {
            message: e.to_string(),
        })?;
        Ok(Generated {
            object,
            usage: response.usage,
        })
    }
}

/// Extract the JSON object from a model reply.
///
/// Accepts a bare object, a fenced code block, or an object surrounded by
/// prose.
pub fn extract_json(text: &str) -> Result<serde_json::Value, LlmError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"));
    if let Some(inner) = unfenced
        && let Ok(value) = serde_json::from_str(inner.trim())
    {
        return Ok(value);
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
        && let Ok(value) = serde_json::from_str(&trimmed[start..=end])
    {
        return Ok(value);
    }

    let preview: String = trimmed.chars().take(120).collect();
    Err(LlmError::ResponseParse {
        message: format!("no JSON object in response: {preview}"),
    })
}

type MockHandler =
    Box<dyn Fn(&CompletionRequest) -> Result<CompletionResponse, LlmError> + Send + Sync>;

/// A mock LLM provider for testing and development.
///
/// Serves queued responses in order, or, when a handler is installed,
/// answers each request by inspecting it. Every request is recorded.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<Vec<CompletionResponse>>,
    handler: Option<MockHandler>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(Vec::new()),
            handler: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a provider that answers every request through `handler`.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<CompletionResponse, LlmError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new()
        }
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(response);
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage::new(100, 50),
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Create a response carrying a JSON object.
    pub fn json_response(value: serde_json::Value) -> CompletionResponse {
        Self::text_response(&value.to_string())
    }

    /// Number of requests served so far.
    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Snapshot of every request served so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// The user prompt of a request (the last user message).
pub fn user_prompt(request: &CompletionRequest) -> &str {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == crate::types::Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(handler) = &self.handler {
            return handler(&request);
        }

        let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        if responses.is_empty() {
            Ok(MockLlmProvider::text_response(
                "I'm a mock LLM. No queued responses available.",
            ))
        } else {
            Ok(responses.remove(0))
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}
