//! LLM provider implementations.
//!
//! Provides concrete implementations of the `LlmProvider` trait for:
//! - OpenAI-compatible APIs (OpenAI, xAI, Google's compatibility endpoint, Ollama, vLLM)
//! - Anthropic Messages API (Claude models)
//!
//! Use `create_provider()` to instantiate the appropriate provider based on config,
//! and `parse_model_spec()` to resolve `provider:model` specifiers.

pub mod anthropic;
pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatibleProvider;

/// Providers accepted in a model specifier.
pub const SUPPORTED_PROVIDERS: &[&str] = &["openai", "anthropic", "google", "xai"];

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `LlmError::RateLimited` (respects `retry_after_secs`),
/// `LlmError::Connection`, and `LlmError::Timeout`. Permanent errors (auth,
/// parse, schema) return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) if !is_retryable(&e) || attempt >= config.max_retries => return Err(e),
            Err(e) => {
                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Check if an error is retryable (transient).
fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
    )
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    if let LlmError::RateLimited { retry_after_secs } = err {
        return (retry_after_secs * 1000).max(computed);
    }
    computed
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% extra
        capped + (capped as f64 * 0.25 * jitter_fraction()) as u64
    } else {
        capped
    }
}

fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// A resolved `provider:model` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
}

/// Default model for a provider when a specifier names only the provider.
pub fn default_model(provider: &str) -> String {
    match provider {
        "anthropic" => "claude-3-haiku-20240307".to_string(),
        "google" => "gemini-1.5-flash".to_string(),
        "xai" => "grok-2-latest".to_string(),
        _ => std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
    }
}

/// Parse a model specifier.
///
/// Accepts `provider:model`, `provider/model`, or a bare model name (which
/// means OpenAI). An empty model part selects the provider's default model.
pub fn parse_model_spec(spec: &str) -> Result<ModelSpec, LlmError> {
    let spec = spec.trim();
    let (provider, model) = match spec.find([':', '/']) {
        Some(idx) => (&spec[..idx], &spec[idx + 1..]),
        None => ("openai", spec),
    };
    let provider = if provider.is_empty() {
        "openai".to_string()
    } else {
        provider.to_lowercase()
    };

    if !SUPPORTED_PROVIDERS.contains(&provider.as_str()) {
        return Err(LlmError::UnsupportedProvider { provider });
    }

    let model = if model.trim().is_empty() {
        default_model(&provider)
    } else {
        model.trim().to_string()
    };
    Ok(ModelSpec { provider, model })
}

/// Create an LLM provider based on the configuration.
///
/// Routes to the appropriate provider implementation:
/// - `"anthropic"` → `AnthropicProvider` (native Anthropic Messages API)
/// - Everything else → `OpenAiCompatibleProvider`
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(config)?)),
        _ => Ok(Arc::new(OpenAiCompatibleProvider::new(config)?)),
    }
}

/// Create a provider for a model specifier, layered over the base config.
pub fn create_provider_for_spec(
    base: &LlmConfig,
    spec: &str,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let parsed = parse_model_spec(spec)?;
    create_provider(&base.with_model(&parsed.provider, &parsed.model))
}
