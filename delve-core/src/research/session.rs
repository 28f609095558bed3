//! Research session entry point.
//!
//! `DeepResearch` validates the caller's arguments, builds a budget and an
//! orchestrator for the session, runs the tree, and packages the result with
//! timing and statistics. It also fronts report composition and clarifying
//! questions so front ends talk to one type.

use super::budget::BudgetTracker;
use super::feedback;
use super::model::{Finding, ResearchResult, SourceRecord};
use super::orchestrator::{ExploreRequest, Orchestrator};
use super::progress::ProgressSink;
use super::report::{ReliabilityDistribution, ReportWriter};
use crate::brain::Generator;
use crate::config::{DelveConfig, LlmConfig, ResearchConfig, RetryConfig};
use crate::error::{LlmError, ResearchError, Result};
use crate::persistence::atomic_write_json;
use crate::providers::{create_provider, create_provider_for_spec};
use crate::search::{FirecrawlProvider, SearchProvider};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-session arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchOptions {
    pub breadth: usize,
    pub depth: usize,
    /// Soft cap on research-phase tokens. The final report is not counted.
    #[serde(default)]
    pub token_budget: Option<u64>,
    /// Natural-language description of sources to avoid.
    #[serde(default)]
    pub source_preferences: Option<String>,
    /// `provider:model` override for this session.
    #[serde(default)]
    pub model: Option<String>,
    /// Findings from earlier research to build on.
    #[serde(default)]
    pub existing_learnings: Vec<String>,
}

impl ResearchOptions {
    pub fn new(breadth: usize, depth: usize) -> Self {
        Self {
            breadth,
            depth,
            ..Default::default()
        }
    }

    pub fn with_token_budget(mut self, budget: Option<u64>) -> Self {
        self.token_budget = budget;
        self
    }

    pub fn with_source_preferences(mut self, preferences: Option<String>) -> Self {
        self.source_preferences = preferences;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_existing_learnings(mut self, learnings: Vec<String>) -> Self {
        self.existing_learnings = learnings;
        self
    }

    /// Reject arguments that would make the session meaningless.
    pub fn validate(
        &self,
        query: &str,
        config: &ResearchConfig,
    ) -> std::result::Result<(), ResearchError> {
        if query.trim().is_empty() {
            return Err(ResearchError::EmptyQuery);
        }
        if self.breadth == 0 || self.breadth > config.max_breadth {
            return Err(ResearchError::InvalidBreadth {
                breadth: self.breadth,
                max: config.max_breadth,
            });
        }
        if self.depth == 0 || self.depth > config.max_depth {
            return Err(ResearchError::InvalidDepth {
                depth: self.depth,
                max: config.max_depth,
            });
        }
        Ok(())
    }
}

/// Summary numbers for a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchStats {
    pub total_findings: usize,
    pub unique_sources: usize,
    pub visited_urls: usize,
    /// Mean finding reliability; `None` when there are no findings.
    pub average_reliability: Option<f64>,
    pub source_reliability: ReliabilityDistribution,
    pub tokens_used: u64,
    pub budget_exhausted: bool,
}

impl ResearchStats {
    pub fn from_result(result: &ResearchResult) -> Self {
        let average_reliability = if result.findings.is_empty() {
            None
        } else {
            let sum: f64 = result.findings.iter().map(|f| f.reliability).sum();
            Some(sum / result.findings.len() as f64)
        };
        Self {
            total_findings: result.findings.len(),
            unique_sources: result.sources.len(),
            visited_urls: result.visited_urls.len(),
            average_reliability,
            source_reliability: ReliabilityDistribution::from_sources(&result.sources),
            tokens_used: result.budget.used,
            budget_exhausted: result.budget.exhausted,
        }
    }
}

/// A finished research session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchOutcome {
    pub id: Uuid,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub result: ResearchResult,
    pub stats: ResearchStats,
}

impl ResearchOutcome {
    pub fn elapsed(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }

    /// Save the outcome as pretty JSON.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        atomic_write_json(path, self)
    }
}

/// Session-level entry point used by every front end.
pub struct DeepResearch {
    generator: Generator,
    llm: Option<LlmConfig>,
    retry: RetryConfig,
    search: Arc<dyn SearchProvider>,
    config: ResearchConfig,
    search_timeout: Duration,
}

impl DeepResearch {
    /// Build from an explicit generator and search provider.
    ///
    /// Per-session model overrides need an LLM config; without one they are
    /// ignored with a warning.
    pub fn new(
        generator: Generator,
        search: Arc<dyn SearchProvider>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            generator,
            llm: None,
            retry: RetryConfig::default(),
            search,
            config,
            search_timeout: Duration::from_secs(15),
        }
    }

    /// Build the production stack: the configured LLM provider and Firecrawl.
    pub fn from_config(config: &DelveConfig) -> Result<Self> {
        let provider = create_provider(&config.llm)?;
        let search = Arc::new(FirecrawlProvider::new(&config.search)?);
        let generator = generator_from(provider, &config.llm, &config.retry);
        Ok(Self {
            generator,
            llm: Some(config.llm.clone()),
            retry: config.retry.clone(),
            search,
            config: config.research.clone(),
            search_timeout: Duration::from_secs(config.search.timeout_secs),
        })
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    fn generator_for(&self, model: Option<&str>) -> std::result::Result<Generator, LlmError> {
        let Some(spec) = model.filter(|m| !m.trim().is_empty()) else {
            return Ok(self.generator.clone());
        };
        match &self.llm {
            Some(llm) => {
                let provider = create_provider_for_spec(llm, spec)?;
                Ok(generator_from(provider, llm, &self.retry))
            }
            None => {
                warn!(model = spec, "No LLM config to resolve model override; using default");
                Ok(self.generator.clone())
            }
        }
    }

    /// Run one research session.
    ///
    /// Invalid arguments are rejected before any remote call. Branch
    /// failures and budget exhaustion never fail the session.
    pub async fn run_research(
        &self,
        query: &str,
        options: ResearchOptions,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<ResearchOutcome> {
        let query = query.trim();
        options.validate(query, &self.config)?;
        let generator = self.generator_for(options.model.as_deref())?;

        let id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %id,
            model = generator.model_name(),
            breadth = options.breadth,
            depth = options.depth,
            token_budget = ?options.token_budget,
            limiter_scope = %self.config.limiter_scope,
            "Research session started"
        );

        let budget = Arc::new(BudgetTracker::new(options.token_budget));
        let orchestrator = Orchestrator::build(
            generator,
            Arc::clone(&self.search),
            &self.config,
            self.search_timeout,
            budget,
        )
        .with_progress(progress)
        .with_source_preferences(options.source_preferences.clone());

        let seed: Vec<Finding> = options
            .existing_learnings
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| Finding::unweighted(l.as_str()))
            .collect();
        let request =
            ExploreRequest::new(query, options.breadth, options.depth).with_findings(seed);
        let result = orchestrator.explore(request).await?;

        let stats = ResearchStats::from_result(&result);
        let completed_at = Utc::now();
        info!(
            %id,
            findings = stats.total_findings,
            sources = stats.unique_sources,
            tokens = stats.tokens_used,
            budget_exhausted = stats.budget_exhausted,
            elapsed_ms = (completed_at - started_at).num_milliseconds(),
            "Research session completed"
        );

        Ok(ResearchOutcome {
            id,
            query: query.to_string(),
            started_at,
            completed_at,
            result,
            stats,
        })
    }

    /// Write the final report for a finished session.
    pub async fn compose_report(
        &self,
        original_query: &str,
        findings: &[Finding],
        sources: &[SourceRecord],
        model: Option<&str>,
    ) -> Result<String> {
        let writer =
            ReportWriter::new(self.generator_for(model)?, self.config.report_token_limit);
        Ok(writer.compose(original_query, findings, sources).await?)
    }

    /// Clarifying questions for a query, at most `max_questions`.
    pub async fn generate_feedback(
        &self,
        query: &str,
        max_questions: usize,
    ) -> Result<Vec<String>> {
        Ok(feedback::generate_feedback(&self.generator, query, max_questions).await?)
    }
}

fn generator_from(
    provider: Arc<dyn crate::brain::LlmProvider>,
    llm: &LlmConfig,
    retry: &RetryConfig,
) -> Generator {
    Generator::new(provider)
        .with_retry(retry.clone())
        .with_temperature(llm.temperature)
        .with_max_tokens(llm.max_tokens)
}
