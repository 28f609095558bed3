//! Configuration system for Delve.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from the user config directory (`<config dir>/delve/config.toml`)
//! and/or `.delve/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level configuration for a Delve installation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelveConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub research: ResearchConfig,
}

impl DelveConfig {
    /// Validate the whole configuration.
    ///
    /// Impossible values are errors; questionable ones come back as warnings.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let mut warnings = self.llm.validate();
        warnings.extend(self.research.validate()?);
        Ok(warnings)
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai", "anthropic", or any OpenAI-compatible endpoint.
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o-mini", "claude-3-haiku-20240307").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Default temperature for generation.
    pub temperature: f32,
    /// Explicit API key. Never serialized back to disk.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 8192,
            temperature: 0.7,
            api_key: None,
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the usual 0.0-2.0 range",
                self.temperature
            ));
        }
        if self.max_tokens < 1024 {
            warnings.push(format!(
                "max_tokens ({}) is small; structured outputs may be truncated",
                self.max_tokens
            ));
        }
        warnings
    }

    /// Return a copy of this config pointed at a different provider/model.
    ///
    /// The API key env var follows the provider when it still names the
    /// previous provider's default.
    pub fn with_model(&self, provider: &str, model: &str) -> Self {
        let mut next = self.clone();
        if next.provider != provider {
            next.api_key_env = default_api_key_env(provider).to_string();
            next.base_url = None;
            next.api_key = None;
        }
        next.provider = provider.to_string();
        next.model = model.to_string();
        next
    }
}

/// The conventional API key variable for a provider.
pub fn default_api_key_env(provider: &str) -> &'static str {
    match provider {
        "anthropic" => "ANTHROPIC_API_KEY",
        "google" | "gemini" => "GOOGLE_API_KEY",
        "xai" => "XAI_API_KEY",
        _ => "OPENAI_API_KEY",
    }
}

/// Retry policy for transient generation errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Web search / scrape provider configuration (Firecrawl API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Self-hosted endpoint. When set, no API key is required.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable name containing the hosted API key.
    pub api_key_env: String,
    /// Per-search deadline in seconds.
    pub timeout_secs: u64,
    /// Explicit API key. Never serialized back to disk.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: "FIRECRAWL_KEY".to_string(),
            timeout_secs: 15,
            api_key: None,
        }
    }
}

/// How the branch concurrency limit is scoped across the research tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterScope {
    /// A fresh limiter per orchestrator invocation. Total in-flight branches
    /// across the tree are not bounded by `concurrency`.
    #[default]
    PerLevel,
    /// One limiter shared by the whole session; bounds concurrent branch work
    /// across every level.
    TreeWide,
}

impl std::fmt::Display for LimiterScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimiterScope::PerLevel => write!(f, "per_level"),
            LimiterScope::TreeWide => write!(f, "tree_wide"),
        }
    }
}

/// Research tree tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Maximum concurrent branches per limiter.
    pub concurrency: usize,
    pub limiter_scope: LimiterScope,
    pub default_breadth: usize,
    pub default_depth: usize,
    pub max_breadth: usize,
    pub max_depth: usize,
    /// Search result limit for exploratory sub-queries.
    pub exploratory_result_limit: usize,
    /// Search result limit for verification sub-queries.
    pub verification_result_limit: usize,
    /// Maximum findings extracted per sub-query.
    pub findings_per_query: usize,
    /// Hard deadline for a single synthesis call.
    pub synthesis_timeout_secs: u64,
    /// Threshold used when generation does not supply one.
    pub default_reliability_threshold: f64,
    /// Model context size in tokens, used to trim prompts.
    pub context_size: usize,
    /// Per-document token cap in synthesis prompts.
    pub document_token_limit: usize,
    /// Per-document token cap in evaluation prompts.
    pub evaluation_snippet_tokens: usize,
    /// Token cap on the learnings fed into the final report.
    pub report_token_limit: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            limiter_scope: LimiterScope::PerLevel,
            default_breadth: 4,
            default_depth: 2,
            max_breadth: 10,
            max_depth: 5,
            exploratory_result_limit: 5,
            verification_result_limit: 8,
            findings_per_query: 3,
            synthesis_timeout_secs: 60,
            default_reliability_threshold: 0.3,
            context_size: 128_000,
            document_token_limit: 25_000,
            evaluation_snippet_tokens: 4_000,
            report_token_limit: 150_000,
        }
    }
}

impl ResearchConfig {
    /// Validate research settings.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid {
                message: "research.concurrency must be at least 1".into(),
            });
        }
        if self.max_breadth == 0 || self.max_depth == 0 {
            return Err(ConfigError::Invalid {
                message: "research.max_breadth and research.max_depth must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.default_reliability_threshold) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "research.default_reliability_threshold ({}) must be within 0.0-1.0",
                    self.default_reliability_threshold
                ),
            });
        }

        let mut warnings = Vec::new();
        if self.default_breadth > self.max_breadth {
            warnings.push(format!(
                "default_breadth ({}) exceeds max_breadth ({})",
                self.default_breadth, self.max_breadth
            ));
        }
        if self.default_depth > self.max_depth {
            warnings.push(format!(
                "default_depth ({}) exceeds max_depth ({})",
                self.default_depth, self.max_depth
            ));
        }
        if self.limiter_scope == LimiterScope::PerLevel && self.concurrency > 8 {
            warnings.push(format!(
                "concurrency ({}) with per_level scope multiplies at every depth level",
                self.concurrency
            ));
        }
        if self.synthesis_timeout_secs == 0 {
            warnings.push("synthesis_timeout_secs is 0; every synthesis will time out".into());
        }
        Ok(warnings)
    }
}

/// Directory name holding the workspace-level config.
pub const WORKSPACE_CONFIG_DIR: &str = ".delve";

/// Path of the user-level config file, if a home directory can be resolved.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "delve", "delve")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_CONFIG_DIR).join("config.toml")
}

/// Load configuration with layered merging.
///
/// Order (lowest to highest priority): defaults, user config, workspace config,
/// `DELVE_`-prefixed environment variables, explicit overrides.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DelveConfig>,
) -> Result<DelveConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(DelveConfig::default()));

    // User-level config
    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (DELVE_LLM__MODEL, DELVE_RESEARCH__CONCURRENCY, etc.)
    figment = figment.merge(Env::prefixed("DELVE_").split("__"));

    // Explicit overrides
    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any Delve configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}

/// Render the default configuration as TOML.
pub fn default_config_toml() -> Result<String, ConfigError> {
    toml::to_string_pretty(&DelveConfig::default()).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}
