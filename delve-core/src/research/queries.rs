//! Sub-query generation.
//!
//! Turns a query plus what is already known (weighted findings, pending
//! research directions, source preferences) into at most `breadth` search
//! queries.

use super::budget::BudgetTracker;
use super::model::{Finding, ResearchDirection, SubQuery, clamp_unit};
use super::prompt::system_prompt;
use crate::brain::{Generator, TokenCounter};
use crate::error::LlmError;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt::Write as _;
use tracing::{debug, info};

/// Inputs for one round of sub-query generation.
#[derive(Debug, Clone, Copy)]
pub struct SubQueryRequest<'a> {
    pub query: &'a str,
    pub breadth: usize,
    pub findings: &'a [Finding],
    pub directions: &'a [ResearchDirection],
    pub source_preferences: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GeneratedQueries {
    queries: Vec<GeneratedQuery>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedQuery {
    query: String,
    research_goal: String,
    #[serde(default)]
    reliability_threshold: Option<f64>,
    is_verification_query: bool,
    #[serde(default)]
    related_direction: Option<String>,
}

impl GeneratedQuery {
    fn into_sub_query(self, default_threshold: f64) -> SubQuery {
        SubQuery {
            query: self.query,
            research_goal: self.research_goal,
            reliability_threshold: clamp_unit(
                self.reliability_threshold.unwrap_or(default_threshold),
            ),
            is_verification: self.is_verification_query,
            related_direction: self.related_direction.filter(|d| !d.trim().is_empty()),
        }
    }
}

/// Generates search queries for one tree level.
#[derive(Clone)]
pub struct QueryGenerator {
    generator: Generator,
    default_threshold: f64,
    learnings_tokens: usize,
}

impl QueryGenerator {
    pub fn new(generator: Generator) -> Self {
        Self {
            generator,
            default_threshold: 0.3,
            learnings_tokens: 128_000,
        }
    }

    /// Threshold for sub-queries that come back without one.
    pub fn with_default_threshold(mut self, threshold: f64) -> Self {
        self.default_threshold = clamp_unit(threshold);
        self
    }

    /// Token cap on the prior-learnings block of the prompt.
    pub fn with_learnings_tokens(mut self, tokens: usize) -> Self {
        self.learnings_tokens = tokens;
        self
    }

    /// Generate up to `request.breadth` sub-queries and record the usage.
    pub async fn generate(
        &self,
        request: SubQueryRequest<'_>,
        budget: &BudgetTracker,
    ) -> Result<Vec<SubQuery>, LlmError> {
        let prompt = build_prompt(&request, self.learnings_tokens);
        let generated = self
            .generator
            .generate_object::<GeneratedQueries>(
                &system_prompt(),
                &prompt,
                &schema(request.breadth),
            )
            .await?;
        budget.record(&generated.usage);

        let queries: Vec<SubQuery> = generated
            .object
            .queries
            .into_iter()
            .map(|q| q.into_sub_query(self.default_threshold))
            .filter(|q| !q.query.trim().is_empty())
            .take(request.breadth)
            .collect();

        let verification = queries.iter().filter(|q| q.is_verification).count();
        if verification > 0 {
            info!(
                count = verification,
                "Generated verification queries to check less reliable information"
            );
        }
        for q in queries.iter().filter(|q| q.related_direction.is_some()) {
            debug!(
                query = %q.query,
                direction = q.related_direction.as_deref().unwrap_or_default(),
                "Query addresses research direction"
            );
        }
        Ok(queries)
    }
}

/// The user prompt for sub-query generation.
///
/// The prior-learnings block is trimmed to `learnings_tokens`.
pub fn build_prompt(request: &SubQueryRequest<'_>, learnings_tokens: usize) -> String {
    let mut prompt = format!(
        "Given the following prompt from the user, generate a list of SERP queries to research the topic. \
         Return a maximum of {} queries, but feel free to return less if the original prompt is clear. \
         Make sure each query is unique and not similar to each other.\n",
        request.breadth
    );

    if !request.findings.is_empty() {
        prompt.push_str(
            "\nHere are previous learnings with their reliability scores (higher score means more reliable):\n",
        );
        let mut learnings = String::new();
        for finding in request.findings {
            let _ = writeln!(
                learnings,
                "[Reliability: {:.2}] {}",
                finding.reliability, finding.content
            );
        }
        prompt.push_str(&TokenCounter::new().trim(&learnings, learnings_tokens));
        if !prompt.ends_with('\n') {
            prompt.push('\n');
        }
        prompt.push_str(
            "\nWhen generating new queries:\n\
             - Follow up on promising leads from reliable sources (reliability >= 0.7)\n\
             - For less reliable information (reliability < 0.7), consider generating verification queries that are likely to find authoritative sources\n\
             - Make each query specific and targeted to advance the research in a clear direction\n",
        );
    }

    if !request.directions.is_empty() {
        let mut directions = request.directions.to_vec();
        directions.sort_by(|a, b| b.priority.cmp(&a.priority));
        prompt.push_str(
            "\nPrioritized research directions to explore (higher priority = more important):\n",
        );
        for direction in &directions {
            let _ = write!(prompt, "[Priority: {}] {}", direction.priority, direction.question);
            if let Some(goal) = &direction.parent_goal {
                let _ = write!(prompt, "\n  (From previous goal: {goal})");
            }
            prompt.push('\n');
        }
        prompt.push_str(
            "\nFocus on generating queries that address these research directions, especially the higher priority ones.\n",
        );
    }

    if let Some(prefs) = request.source_preferences.filter(|p| !p.trim().is_empty()) {
        let _ = write!(
            prompt,
            "\nUser source preferences to avoid during research:\n{prefs}\n\n\
             Prefer authoritative, primary, and technical sources; avoid queries that are likely to surface excluded sources (e.g., thin SEO listicles, affiliate reviews) when possible.\n"
        );
    }

    let _ = write!(prompt, "\n<prompt>{}</prompt>", request.query);
    prompt
}

fn schema(breadth: usize) -> Value {
    json!({
        "type": "object",
        "properties": {
            "queries": {
                "type": "array",
                "description": format!(
                    "List of SERP queries, at most {breadth}. Each query should be unique and advance the research in a meaningful way."
                ),
                "items": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "The SERP query" },
                        "researchGoal": {
                            "type": "string",
                            "description": "The goal of the research this query is meant to accomplish, then how to advance the research once results are found, with additional research directions."
                        },
                        "reliabilityThreshold": {
                            "type": "number",
                            "description": "Minimum reliability score (0 to 1) for sources to be trusted for this query. Higher (0.7+) for verification queries, lower (0.3) for exploratory ones."
                        },
                        "isVerificationQuery": {
                            "type": "boolean",
                            "description": "Whether this query verifies information from less reliable sources"
                        },
                        "relatedDirection": {
                            "type": ["string", "null"],
                            "description": "The research direction this query addresses, or null"
                        }
                    },
                    "required": ["query", "researchGoal", "isVerificationQuery"]
                }
            }
        },
        "required": ["queries"]
    })
}
