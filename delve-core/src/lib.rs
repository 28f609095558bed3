//! # Delve Core
//!
//! Core library for the Delve deep-research engine.
//! Provides the LLM interface (brain), search providers, the recursive
//! research orchestrator, configuration, and fundamental types.

pub mod brain;
pub mod config;
pub mod error;
pub mod persistence;
pub mod providers;
pub mod research;
pub mod search;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{Generator, LlmProvider, MockLlmProvider, TokenCounter, trim_prompt};
pub use config::{DelveConfig, LimiterScope, LlmConfig, ResearchConfig, SearchConfig};
pub use error::{DelveError, LlmError, ResearchError, Result, SearchError};
pub use research::{
    ChannelProgress, DeepResearch, Finding, NoOpProgress, ProgressSink, ResearchOptions,
    ResearchOutcome, ResearchProgress, ResearchResult, ResearchStats, SourceRecord,
};
pub use search::{MockSearchProvider, SearchDocument, SearchProvider};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
