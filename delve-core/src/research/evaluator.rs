//! Source reliability and suitability evaluation.

use super::budget::BudgetTracker;
use super::model::{SourceRecord, clamp_unit, domain_of};
use super::prompt::system_prompt;
use crate::brain::{Generator, TokenCounter};
use crate::error::LlmError;
use crate::search::SearchDocument;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

/// Score used when the evaluation call fails.
pub const FALLBACK_SCORE: f64 = 0.5;
/// Reasoning recorded when none is available.
pub const FALLBACK_REASONING: &str = "No reasoning provided";

/// Outcome of evaluating one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: f64,
    pub reasoning: String,
    /// `false` excludes the document regardless of score.
    pub use_source: bool,
    pub preference_reason: Option<String>,
    pub domain: String,
}

impl Evaluation {
    /// Neutral evaluation kept when the remote call fails.
    pub fn fallback(domain: String) -> Self {
        Self {
            score: FALLBACK_SCORE,
            reasoning: FALLBACK_REASONING.to_string(),
            use_source: true,
            preference_reason: None,
            domain,
        }
    }

    /// Turn into a source record for `url`.
    pub fn into_source(self, url: String, title: Option<String>) -> SourceRecord {
        SourceRecord {
            url,
            title: title.filter(|t| !t.is_empty()),
            domain: self.domain,
            reliability_score: self.score,
            reliability_reasoning: if self.reasoning.trim().is_empty() {
                FALLBACK_REASONING.to_string()
            } else {
                self.reasoning
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedEvaluation {
    score: f64,
    reasoning: String,
    #[serde(rename = "use")]
    use_source: bool,
    #[serde(default)]
    preference_reason: Option<String>,
}

#[derive(Clone)]
pub struct ReliabilityEvaluator {
    generator: Generator,
    counter: TokenCounter,
    snippet_tokens: usize,
}

impl ReliabilityEvaluator {
    pub fn new(generator: Generator, snippet_tokens: usize) -> Self {
        Self {
            generator,
            counter: TokenCounter::new(),
            snippet_tokens,
        }
    }

    /// Evaluate one document against the query and preferences.
    pub async fn evaluate(
        &self,
        document: &SearchDocument,
        query: &str,
        source_preferences: Option<&str>,
        budget: &BudgetTracker,
    ) -> Result<Evaluation, LlmError> {
        let url = document.url.as_deref().unwrap_or_default();
        let domain = domain_of(url);
        let snippet = self
            .counter
            .trim(document.text.as_deref().unwrap_or_default(), self.snippet_tokens);
        let prompt = build_prompt(
            url,
            &domain,
            document.title.as_deref().unwrap_or_default(),
            &snippet,
            query,
            source_preferences,
        );

        let generated = self
            .generator
            .generate_object::<GeneratedEvaluation>(&system_prompt(), &prompt, &schema())
            .await?;
        budget.record(&generated.usage);

        let object = generated.object;
        Ok(Evaluation {
            score: clamp_unit(object.score),
            reasoning: object.reasoning,
            use_source: object.use_source,
            preference_reason: object.preference_reason,
            domain,
        })
    }

    /// Evaluate, degrading to the neutral fallback on failure.
    pub async fn evaluate_or_fallback(
        &self,
        document: &SearchDocument,
        query: &str,
        source_preferences: Option<&str>,
        budget: &BudgetTracker,
    ) -> Evaluation {
        match self
            .evaluate(document, query, source_preferences, budget)
            .await
        {
            Ok(evaluation) => evaluation,
            Err(e) => {
                let url = document.url.as_deref().unwrap_or_default();
                warn!(url, error = %e, "Source evaluation failed; keeping with neutral score");
                Evaluation::fallback(domain_of(url))
            }
        }
    }
}

fn build_prompt(
    url: &str,
    domain: &str,
    title: &str,
    snippet: &str,
    query: &str,
    source_preferences: Option<&str>,
) -> String {
    let preferences = match source_preferences.filter(|p| !p.trim().is_empty()) {
        Some(prefs) => format!(
            "User preferences to avoid (apply holistically, not via keywords):\n\
             <preferences>{prefs}</preferences>\n\n\
             Also return whether this source should be USED given these preferences."
        ),
        None => "No special user preferences provided.".to_string(),
    };
    format!(
        "Evaluate the reliability and suitability of this source for the research query. \
         Provide a reliability score and a brief reasoning. If user preferences are provided, \
         judge suitability holistically against them.\n\n\
         {preferences}\n\n\
         Research query:\n<query>{query}</query>\n\n\
         Source:\n- URL: {url}\n- Domain: {domain}\n- Title: {title}\n- Content (truncated):\n\"\"\"\n{snippet}\n\"\"\""
    )
}

fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "score": { "type": "number", "description": "Reliability between 0 and 1" },
            "reasoning": { "type": "string" },
            "use": { "type": "boolean", "description": "Whether the source should be used" },
            "preferenceReason": { "type": "string" }
        },
        "required": ["score", "reasoning", "use"]
    })
}
