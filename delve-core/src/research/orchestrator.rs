//! Recursive research-tree orchestrator.
//!
//! Each invocation generates up to `breadth` sub-queries, runs them as
//! concurrent branches under a limiter, and recurses into every successful
//! branch with `ceil(breadth / 2)` and `depth - 1` while depth remains and
//! the budget is not exhausted. Children are awaited together (`join_all`)
//! and their results merged with deduplication.

use super::branch::{BranchExecutor, is_timeout};
use super::budget::BudgetTracker;
use super::evaluator::ReliabilityEvaluator;
use super::model::{
    BranchFragment, Finding, ResearchDirection, ResearchResult, SourceRecord, SubQuery,
    dedup_findings, dedup_sources, dedup_urls,
};
use super::progress::{NoOpProgress, ProgressReporter, ProgressSink, ResearchProgress};
use super::queries::{QueryGenerator, SubQueryRequest};
use super::synthesizer::ResultSynthesizer;
use crate::brain::Generator;
use crate::config::{LimiterScope, ResearchConfig};
use crate::error::{DelveError, ResearchError};
use crate::search::SearchProvider;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Breadth handed to the next tree level.
pub fn child_breadth(breadth: usize) -> usize {
    breadth.div_ceil(2)
}

/// Query text for the level below a branch.
pub fn follow_up_query(research_goal: &str, directions: &[ResearchDirection]) -> String {
    let mut query =
        format!("Previous research goal: {research_goal}\nFollow-up research directions: ");
    for direction in directions {
        query.push('\n');
        query.push_str(&direction.question);
    }
    query.trim().to_string()
}

/// Arguments of one `explore` invocation.
#[derive(Debug, Clone, Default)]
pub struct ExploreRequest {
    pub query: String,
    pub breadth: usize,
    pub depth: usize,
    pub findings: Vec<Finding>,
    pub sources: Vec<SourceRecord>,
    pub visited_urls: Vec<String>,
    pub directions: Vec<ResearchDirection>,
}

impl ExploreRequest {
    pub fn new(query: impl Into<String>, breadth: usize, depth: usize) -> Self {
        Self {
            query: query.into(),
            breadth,
            depth,
            ..Default::default()
        }
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }
}

/// State shared by the branches of one invocation.
struct Level<'a> {
    query: &'a str,
    breadth: usize,
    depth: usize,
    findings: &'a [Finding],
    sources: &'a [SourceRecord],
    visited_urls: &'a [String],
    limiter: &'a Semaphore,
    progress: &'a ProgressReporter,
}

pub struct Orchestrator {
    queries: QueryGenerator,
    branch: BranchExecutor,
    budget: Arc<BudgetTracker>,
    progress: Arc<dyn ProgressSink>,
    source_preferences: Option<String>,
    concurrency: usize,
    scope: LimiterScope,
    tree_limiter: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        queries: QueryGenerator,
        branch: BranchExecutor,
        config: &ResearchConfig,
        budget: Arc<BudgetTracker>,
    ) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            queries,
            branch,
            budget,
            progress: Arc::new(NoOpProgress),
            source_preferences: None,
            concurrency,
            scope: config.limiter_scope,
            tree_limiter: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Wire every component from one generator and one search provider.
    pub fn build(
        generator: Generator,
        search: Arc<dyn SearchProvider>,
        config: &ResearchConfig,
        search_timeout: Duration,
        budget: Arc<BudgetTracker>,
    ) -> Self {
        let evaluator =
            ReliabilityEvaluator::new(generator.clone(), config.evaluation_snippet_tokens);
        let synthesizer = ResultSynthesizer::new(
            generator.clone(),
            Duration::from_secs(config.synthesis_timeout_secs),
            config.document_token_limit,
        );
        let branch = BranchExecutor::new(search, evaluator, synthesizer, config, search_timeout);
        let queries = QueryGenerator::new(generator)
            .with_default_threshold(config.default_reliability_threshold)
            .with_learnings_tokens(config.context_size);
        Self::new(queries, branch, config, budget)
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn with_source_preferences(mut self, preferences: Option<String>) -> Self {
        self.source_preferences = preferences.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn budget(&self) -> &Arc<BudgetTracker> {
        &self.budget
    }

    /// Explore one tree level and everything below it.
    ///
    /// Fails only when this level's sub-query generation fails; branch
    /// failures below are absorbed.
    pub fn explore(
        &self,
        request: ExploreRequest,
    ) -> BoxFuture<'_, Result<ResearchResult, DelveError>> {
        async move { self.explore_level(request).await }.boxed()
    }

    async fn explore_level(&self, request: ExploreRequest) -> Result<ResearchResult, DelveError> {
        let ExploreRequest {
            query,
            breadth,
            depth,
            findings,
            sources,
            visited_urls,
            directions,
        } = request;
        info!(breadth, depth, directions = directions.len(), "Exploring research level");

        let progress = ProgressReporter::new(
            ResearchProgress::new(depth, breadth),
            Arc::clone(&self.progress),
        );

        let sub_queries = self
            .queries
            .generate(
                SubQueryRequest {
                    query: &query,
                    breadth,
                    findings: &findings,
                    directions: &directions,
                    source_preferences: self.source_preferences.as_deref(),
                },
                &self.budget,
            )
            .await?;

        progress
            .update(|p| {
                p.total_queries = sub_queries.len();
                p.current_query = sub_queries.first().map(|q| q.query.clone());
            })
            .await;

        let level_limiter;
        let limiter: &Semaphore = match self.scope {
            LimiterScope::PerLevel => {
                level_limiter = Semaphore::new(self.concurrency);
                &level_limiter
            }
            LimiterScope::TreeWide => &self.tree_limiter,
        };
        let level = Level {
            query: &query,
            breadth,
            depth,
            findings: &findings,
            sources: &sources,
            visited_urls: &visited_urls,
            limiter,
            progress: &progress,
        };

        let contributions =
            join_all(sub_queries.iter().map(|sq| self.run_branch(&level, sq))).await;

        let mut all_findings = findings;
        let mut all_sources = sources;
        let mut all_urls = visited_urls;
        for contribution in contributions {
            all_findings.extend(contribution.findings);
            all_sources.extend(contribution.sources);
            all_urls.extend(contribution.visited_urls);
        }

        Ok(ResearchResult {
            findings: dedup_findings(all_findings),
            sources: dedup_sources(all_sources),
            visited_urls: dedup_urls(all_urls),
            budget: self.budget.snapshot(),
        })
    }

    /// One branch plus its subtree. Never fails; failures contribute nothing.
    async fn run_branch(&self, level: &Level<'_>, sub_query: &SubQuery) -> BranchFragment {
        let Ok(permit) = level.limiter.acquire().await else {
            return BranchFragment::default();
        };
        if self.budget.is_exhausted() {
            debug!(query = %sub_query.query, "Budget exhausted; branch skipped");
            return BranchFragment::default();
        }

        let next_breadth = child_breadth(level.breadth);
        let mut fragment = match self
            .branch
            .run(
                sub_query,
                next_breadth,
                self.source_preferences.as_deref(),
                &self.budget,
            )
            .await
        {
            Ok(fragment) => fragment,
            Err(e) => {
                let failure = ResearchError::BranchFailed {
                    query: sub_query.query.clone(),
                    reason: e.to_string(),
                };
                if is_timeout(&e) {
                    warn!(error = %failure, "Timeout error running query");
                } else {
                    warn!(error = %failure, "Error running query");
                }
                level.progress.update(|p| p.completed_queries += 1).await;
                return BranchFragment::default();
            }
        };
        let directions = std::mem::take(&mut fragment.follow_up_directions);
        let learnings: Vec<String> = fragment.findings.iter().map(|f| f.content.clone()).collect();
        let follow_ups: Vec<String> = directions.iter().map(|d| d.question.clone()).collect();

        if self.budget.is_exhausted() {
            info!(query = %sub_query.query, "Budget reached; not expanding further");
            level
                .progress
                .update(|p| {
                    p.completed_queries += 1;
                    p.current_query = Some(sub_query.query.clone());
                    p.parent_query = Some(level.query.to_string());
                    p.learnings_count = Some(learnings.len());
                    p.learnings = Some(learnings);
                    p.follow_up_questions = Some(follow_ups);
                })
                .await;
            return fragment;
        }

        let next_depth = level.depth.saturating_sub(1);
        if next_depth == 0 {
            level
                .progress
                .update(|p| {
                    p.current_depth = 0;
                    p.completed_queries += 1;
                    p.current_query = Some(sub_query.query.clone());
                })
                .await;
            return fragment;
        }

        info!(depth = next_depth, breadth = next_breadth, "Researching deeper");
        level
            .progress
            .update(|p| {
                p.current_depth = next_depth;
                p.current_breadth = next_breadth;
                p.completed_queries += 1;
                p.current_query = Some(sub_query.query.clone());
                p.parent_query = Some(level.query.to_string());
                p.learnings_count = Some(learnings.len());
                p.learnings = Some(learnings);
                p.follow_up_questions = Some(follow_ups);
            })
            .await;

        if self.scope == LimiterScope::TreeWide {
            drop(permit);
        }

        let child = ExploreRequest {
            query: follow_up_query(&sub_query.research_goal, &directions),
            breadth: next_breadth,
            depth: next_depth,
            findings: dedup_findings(
                level
                    .findings
                    .iter()
                    .cloned()
                    .chain(fragment.findings.iter().cloned()),
            ),
            sources: dedup_sources(
                level
                    .sources
                    .iter()
                    .cloned()
                    .chain(fragment.sources.iter().cloned()),
            ),
            visited_urls: dedup_urls(
                level
                    .visited_urls
                    .iter()
                    .cloned()
                    .chain(fragment.visited_urls.iter().cloned()),
            ),
            directions,
        };
        match self.explore(child).await {
            Ok(result) => BranchFragment {
                findings: result.findings,
                sources: result.sources,
                visited_urls: result.visited_urls,
                follow_up_directions: Vec::new(),
            },
            Err(e) => {
                warn!(query = %sub_query.query, error = %e, "Error running query");
                fragment
            }
        }
    }
}
