//! Final report composition.
//!
//! One generation call writes the Markdown body from every finding; the
//! sources section is appended deterministically, sorted by reliability.

use super::model::{Finding, SourceRecord};
use super::prompt::system_prompt;
use crate::brain::{Generator, TokenCounter};
use crate::error::LlmError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt::Write as _;
use tracing::info;

/// Scores at or above this are "high" reliability.
pub const HIGH_RELIABILITY: f64 = 0.8;
/// Scores at or above this (and below high) are "medium" reliability.
pub const MEDIUM_RELIABILITY: f64 = 0.5;

/// Count of sources per reliability band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReliabilityDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl ReliabilityDistribution {
    pub fn from_sources(sources: &[SourceRecord]) -> Self {
        sources.iter().fold(Self::default(), |mut dist, s| {
            if s.reliability_score >= HIGH_RELIABILITY {
                dist.high += 1;
            } else if s.reliability_score >= MEDIUM_RELIABILITY {
                dist.medium += 1;
            } else {
                dist.low += 1;
            }
            dist
        })
    }
}

/// Sources sorted by descending reliability, ties broken by URL.
pub fn ranked_sources(sources: &[SourceRecord]) -> Vec<&SourceRecord> {
    let mut ranked: Vec<&SourceRecord> = sources.iter().collect();
    ranked.sort_by(|a, b| {
        b.reliability_score
            .total_cmp(&a.reliability_score)
            .then_with(|| a.url.cmp(&b.url))
    });
    ranked
}

/// The `## Sources` section appended to every report.
pub fn sources_section(sources: &[SourceRecord]) -> String {
    let entries: Vec<String> = ranked_sources(sources)
        .into_iter()
        .map(|s| {
            let mut entry = format!(
                "- {}\n  - Reliability: {:.2} - {}",
                s.url, s.reliability_score, s.reliability_reasoning
            );
            if let Some(title) = s.title.as_deref().filter(|t| !t.is_empty()) {
                let _ = write!(entry, "\n  - Title: {title}");
            }
            entry
        })
        .collect();
    format!("\n\n## Sources\n\n{}", entries.join("\n\n"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedReport {
    report_markdown: String,
}

/// Writes the final Markdown report. Usage is not charged to any budget.
#[derive(Clone)]
pub struct ReportWriter {
    generator: Generator,
    counter: TokenCounter,
    token_limit: usize,
}

impl ReportWriter {
    pub fn new(generator: Generator, token_limit: usize) -> Self {
        Self {
            generator,
            counter: TokenCounter::new(),
            token_limit,
        }
    }

    pub async fn compose(
        &self,
        original_query: &str,
        findings: &[Finding],
        sources: &[SourceRecord],
    ) -> Result<String, LlmError> {
        let prompt = self.build_prompt(original_query, findings, sources);
        let generated = self
            .generator
            .generate_object::<GeneratedReport>(&system_prompt(), &prompt, &schema())
            .await?;
        info!(
            findings = findings.len(),
            sources = sources.len(),
            tokens = generated.usage.total(),
            "Final report written"
        );
        Ok(generated.object.report_markdown + &sources_section(sources))
    }

    fn build_prompt(
        &self,
        original_query: &str,
        findings: &[Finding],
        sources: &[SourceRecord],
    ) -> String {
        let learnings = findings
            .iter()
            .map(|f| {
                format!(
                    "<learning reliability=\"{:.2}\">\n{}\n</learning>",
                    f.reliability, f.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let learnings = self.counter.trim(&learnings, self.token_limit);
        let dist = ReliabilityDistribution::from_sources(sources);

        format!(
            "Given the following prompt from the user, write a final report on the topic using the learnings from research. \
             Make it as detailed as possible, aim for 3 or more pages, include ALL the learnings from research. \
             Consider source reliability when drawing conclusions.\n\n\
             <prompt>{original_query}</prompt>\n\n\
             Source reliability overview: {} high (>= {HIGH_RELIABILITY}), {} medium (>= {MEDIUM_RELIABILITY}), {} low.\n\n\
             Here are all the learnings from previous research:\n\n\
             <learnings>\n{learnings}\n</learnings>",
            dist.high, dist.medium, dist.low
        )
    }
}

fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "reportMarkdown": {
                "type": "string",
                "description": "Final report on the topic in Markdown"
            }
        },
        "required": ["reportMarkdown"]
    })
}
