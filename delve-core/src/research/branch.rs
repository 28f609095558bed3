//! One branch of the research tree: search, evaluate, rank, synthesize.

use super::budget::BudgetTracker;
use super::evaluator::ReliabilityEvaluator;
use super::model::{BranchFragment, ResearchDirection, SubQuery, dedup_urls};
use super::synthesizer::{RankedDocument, ResultSynthesizer, SynthesisCaps};
use crate::config::ResearchConfig;
use crate::error::{DelveError, SearchError};
use crate::search::{SearchOptions, SearchProvider};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Runs a single sub-query end to end, without recursion.
#[derive(Clone)]
pub struct BranchExecutor {
    search: Arc<dyn SearchProvider>,
    evaluator: ReliabilityEvaluator,
    synthesizer: ResultSynthesizer,
    exploratory_limit: usize,
    verification_limit: usize,
    search_timeout: Duration,
    max_findings: usize,
}

impl BranchExecutor {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        evaluator: ReliabilityEvaluator,
        synthesizer: ResultSynthesizer,
        config: &ResearchConfig,
        search_timeout: Duration,
    ) -> Self {
        Self {
            search,
            evaluator,
            synthesizer,
            exploratory_limit: config.exploratory_result_limit,
            verification_limit: config.verification_result_limit,
            search_timeout,
            max_findings: config.findings_per_query,
        }
    }

    /// Result count for a sub-query: verification queries look wider.
    pub fn result_limit(&self, sub_query: &SubQuery) -> usize {
        if sub_query.is_verification {
            self.verification_limit
        } else {
            self.exploratory_limit
        }
    }

    /// Run the branch.
    ///
    /// `max_follow_ups` caps the follow-up directions handed to the next
    /// level. Remote failures (search, synthesis) are returned as errors for
    /// the orchestrator to absorb; evaluator failures degrade in place.
    pub async fn run(
        &self,
        sub_query: &SubQuery,
        max_follow_ups: usize,
        source_preferences: Option<&str>,
        budget: &BudgetTracker,
    ) -> Result<BranchFragment, DelveError> {
        let options = SearchOptions {
            limit: self.result_limit(sub_query),
            timeout: self.search_timeout,
            ..Default::default()
        };
        let documents = self.search.search(&sub_query.query, &options).await?;
        let visited_urls = dedup_urls(documents.iter().filter_map(|d| d.url.clone()));

        let evaluations = join_all(documents.iter().filter(|d| d.url.is_some()).map(
            |doc| async move {
                let evaluation = self
                    .evaluator
                    .evaluate_or_fallback(doc, &sub_query.query, source_preferences, budget)
                    .await;
                (doc, evaluation)
            },
        ))
        .await;

        let mut excluded = 0usize;
        let mut sources = Vec::new();
        let mut ranked = Vec::new();
        for (doc, evaluation) in evaluations {
            if !evaluation.use_source {
                excluded += 1;
                continue;
            }
            let Some(url) = doc.url.clone() else { continue };
            let source = evaluation.into_source(url, doc.title.clone());
            if let Some(text) = doc.text.as_deref().filter(|t| !t.trim().is_empty()) {
                ranked.push(RankedDocument {
                    content: text.to_string(),
                    source: source.clone(),
                });
            }
            sources.push(source);
        }

        ranked.sort_by(|a, b| {
            b.source
                .reliability_score
                .total_cmp(&a.source.reliability_score)
        });
        ranked.retain(|d| d.source.reliability_score >= sub_query.reliability_threshold);

        info!(
            query = %sub_query.query,
            documents = documents.len(),
            kept = sources.len(),
            above_threshold = ranked.len(),
            threshold = sub_query.reliability_threshold,
            excluded,
            "Search results evaluated"
        );

        if ranked.is_empty() {
            debug!(query = %sub_query.query, "No usable documents; skipping synthesis");
            return Ok(BranchFragment {
                sources,
                visited_urls,
                ..Default::default()
            });
        }

        let synthesis = self
            .synthesizer
            .synthesize(
                &sub_query.query,
                &ranked,
                Some(sub_query.research_goal.as_str()),
                SynthesisCaps {
                    max_findings: self.max_findings,
                    max_follow_ups,
                },
                budget,
            )
            .await?;

        let goal = Some(sub_query.research_goal.clone()).filter(|g| !g.trim().is_empty());
        let follow_up_directions = synthesis
            .follow_ups
            .into_iter()
            .map(|f| ResearchDirection::new(f.question, f.priority, goal.clone()))
            .collect();

        Ok(BranchFragment {
            findings: synthesis.findings,
            sources,
            visited_urls,
            follow_up_directions,
        })
    }
}

/// Whether a branch error is a timeout, for log wording.
pub(crate) fn is_timeout(error: &DelveError) -> bool {
    matches!(
        error,
        DelveError::Search(SearchError::Timeout { .. })
            | DelveError::Llm(crate::error::LlmError::Timeout { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{Generator, MockLlmProvider, user_prompt};
    use crate::search::{MockSearchProvider, MockSearchResponse, SearchDocument};
    use crate::types::CompletionRequest;
    use serde_json::json;

    fn sub_query(threshold: f64, verification: bool) -> SubQuery {
        SubQuery {
            query: "printing press origins".into(),
            research_goal: "Establish when and where the press appeared".into(),
            reliability_threshold: threshold,
            is_verification: verification,
            related_direction: None,
        }
    }

    /// Routes evaluation prompts by URL and answers synthesis with fixed output.
    fn handler(
        request: &CompletionRequest,
    ) -> Result<crate::types::CompletionResponse, crate::error::LlmError> {
        let prompt = user_prompt(request);
        let value = if prompt.starts_with("Evaluate the reliability") {
            if prompt.contains("listicle.example") {
                json!({"score": 0.95, "reasoning": "SEO list", "use": false})
            } else if prompt.contains("blog.example") {
                json!({"score": 0.2, "reasoning": "Anonymous blog", "use": true})
            } else {
                json!({"score": 0.9, "reasoning": "Encyclopedia", "use": true})
            }
        } else {
            json!({
                "learnings": [{"content": "Gutenberg's press dates to about 1440.", "confidence": 0.9, "sources": ["britannica.com"]}],
                "followUpQuestions": [
                    {"question": "How did the press spread?", "priority": 4, "reason": "gap"},
                    {"question": "Who funded it?", "priority": 2, "reason": "gap"}
                ],
                "sourceQuality": {"mostReliableSources": [], "contentGaps": [], "reliabilityAnalysis": ""}
            })
        };
        Ok(MockLlmProvider::json_response(value))
    }

    fn executor(llm: Arc<MockLlmProvider>, search: Arc<MockSearchProvider>) -> BranchExecutor {
        let generator = Generator::new(llm);
        let config = ResearchConfig::default();
        BranchExecutor::new(
            search,
            ReliabilityEvaluator::new(generator.clone(), config.evaluation_snippet_tokens),
            ResultSynthesizer::new(
                generator,
                Duration::from_secs(config.synthesis_timeout_secs),
                config.document_token_limit,
            ),
            &config,
            Duration::from_secs(15),
        )
    }

    fn documents() -> Vec<SearchDocument> {
        vec![
            SearchDocument::new("https://britannica.com/press", "Press", "Gutenberg, 1440"),
            SearchDocument::new("https://listicle.example/top10", "Top 10", "listicle body"),
            SearchDocument::new("https://blog.example/post", "Post", "blog body"),
            SearchDocument {
                url: None,
                title: Some("No url".into()),
                text: Some("orphan".into()),
            },
        ]
    }

    #[tokio::test]
    async fn test_branch_excludes_and_filters() {
        let llm = Arc::new(MockLlmProvider::with_handler(handler));
        let search = Arc::new(MockSearchProvider::always(documents()));
        let budget = BudgetTracker::unlimited();

        let fragment = executor(llm.clone(), search.clone())
            .run(&sub_query(0.5, false), 1, None, &budget)
            .await
            .unwrap();

        // use=false is dropped even with the top score
        assert!(fragment.sources.iter().all(|s| !s.url.contains("listicle")));
        assert_eq!(fragment.sources.len(), 2);
        assert_eq!(fragment.visited_urls.len(), 3);
        assert_eq!(fragment.findings.len(), 1);
        assert_eq!(fragment.follow_up_directions.len(), 1);
        assert_eq!(fragment.follow_up_directions[0].priority, 4);
        assert_eq!(
            fragment.follow_up_directions[0].parent_goal.as_deref(),
            Some("Establish when and where the press appeared")
        );

        // 3 evaluations + 1 synthesis
        assert_eq!(llm.call_count(), 4);
        let requests = llm.requests();
        let synthesis_prompt = user_prompt(requests.last().unwrap());
        assert!(synthesis_prompt.contains("britannica.com"));
        assert!(!synthesis_prompt.contains("blog body"));
        assert_eq!(search.calls()[0].1.limit, 5);
    }

    #[tokio::test]
    async fn test_verification_uses_wider_limit() {
        let llm = Arc::new(MockLlmProvider::with_handler(handler));
        let search = Arc::new(MockSearchProvider::new());
        let fragment = executor(llm.clone(), search.clone())
            .run(&sub_query(0.3, true), 2, None, &BudgetTracker::unlimited())
            .await
            .unwrap();
        assert_eq!(search.calls()[0].1.limit, 8);
        assert!(fragment.is_empty());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_nothing_above_threshold_skips_synthesis() {
        let llm = Arc::new(MockLlmProvider::with_handler(handler));
        let search = Arc::new(MockSearchProvider::always(vec![SearchDocument::new(
            "https://blog.example/post",
            "Post",
            "blog body",
        )]));
        let fragment = executor(llm.clone(), search)
            .run(&sub_query(0.5, false), 2, None, &BudgetTracker::unlimited())
            .await
            .unwrap();
        assert!(fragment.findings.is_empty());
        assert_eq!(fragment.sources.len(), 1);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_search_failure_is_error() {
        let llm = Arc::new(MockLlmProvider::with_handler(handler));
        let search = Arc::new(MockSearchProvider::new().with_fallback(MockSearchResponse::Timeout));
        let result = executor(llm, search)
            .run(&sub_query(0.5, false), 2, None, &BudgetTracker::unlimited())
            .await;
        let err = result.unwrap_err();
        assert!(is_timeout(&err));
    }
}
