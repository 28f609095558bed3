//! Error types for the Delve research core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering generation, search, configuration, and research-session domains.

use std::path::PathBuf;

/// Top-level error type for the Delve core library.
#[derive(Debug, thiserror::Error)]
pub enum DelveError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions and structured generation.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Generated object failed schema validation: {}", errors.join("; "))]
    SchemaValidation { errors: Vec<String> },

    #[error("Provider not supported: {provider}")]
    UnsupportedProvider { provider: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the web search / content fetch collaborator.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {message}")]
    Request { message: String },

    #[error("Search response invalid: {message}")]
    Response { message: String },

    #[error("Search timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Search provider not configured: {message}")]
    NotConfigured { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from a research session.
///
/// Only the argument variants ever reach a caller; branch failures are
/// absorbed by the orchestrator and logged.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("Research query must not be empty")]
    EmptyQuery,

    #[error("Breadth must be between 1 and {max}, got {breadth}")]
    InvalidBreadth { breadth: usize, max: usize },

    #[error("Depth must be between 1 and {max}, got {depth}")]
    InvalidDepth { depth: usize, max: usize },

    #[error("Branch '{query}' failed: {reason}")]
    BranchFailed { query: String, reason: String },
}

/// A type alias for results using the top-level `DelveError`.
pub type Result<T> = std::result::Result<T, DelveError>;
