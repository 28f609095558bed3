//! Result synthesis: ranked documents in, findings and follow-ups out.

use super::budget::BudgetTracker;
use super::model::{Finding, SourceRecord};
use super::prompt::system_prompt;
use crate::brain::{Generator, TokenCounter};
use crate::error::LlmError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;

/// A kept document with its evaluation, ready for synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedDocument {
    pub content: String,
    pub source: SourceRecord,
}

/// Per-call output caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisCaps {
    pub max_findings: usize,
    pub max_follow_ups: usize,
}

impl Default for SynthesisCaps {
    fn default() -> Self {
        Self {
            max_findings: 3,
            max_follow_ups: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUp {
    pub question: String,
    /// 1 to 5, higher means a bigger reliability gap.
    pub priority: u8,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceQuality {
    #[serde(default)]
    pub most_reliable_sources: Vec<String>,
    #[serde(default)]
    pub content_gaps: Vec<String>,
    #[serde(default)]
    pub reliability_analysis: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Synthesis {
    pub findings: Vec<Finding>,
    pub follow_ups: Vec<FollowUp>,
    pub source_quality: SourceQuality,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedSynthesis {
    learnings: Vec<GeneratedLearning>,
    follow_up_questions: Vec<GeneratedFollowUp>,
    #[serde(default)]
    source_quality: SourceQuality,
}

#[derive(Debug, Deserialize)]
struct GeneratedLearning {
    content: String,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct GeneratedFollowUp {
    question: String,
    #[serde(default)]
    priority: Option<f64>,
    #[serde(default)]
    reason: String,
}

#[derive(Clone)]
pub struct ResultSynthesizer {
    generator: Generator,
    counter: TokenCounter,
    timeout: Duration,
    document_tokens: usize,
}

impl ResultSynthesizer {
    pub fn new(generator: Generator, timeout: Duration, document_tokens: usize) -> Self {
        Self {
            generator,
            counter: TokenCounter::new(),
            timeout,
            document_tokens,
        }
    }

    /// Synthesize findings and follow-ups under the hard timeout.
    ///
    /// An elapsed deadline is `LlmError::Timeout`; the caller treats it as a
    /// branch failure.
    pub async fn synthesize(
        &self,
        query: &str,
        documents: &[RankedDocument],
        research_goal: Option<&str>,
        caps: SynthesisCaps,
        budget: &BudgetTracker,
    ) -> Result<Synthesis, LlmError> {
        let prompt = self.build_prompt(query, documents, research_goal, caps);
        let system = system_prompt();
        let output_schema = schema(caps);
        let call = self.generator.generate_object::<GeneratedSynthesis>(
            &system,
            &prompt,
            &output_schema,
        );
        let generated = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| LlmError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            })??;
        budget.record(&generated.usage);

        let object = generated.object;
        let synthesis = Synthesis {
            findings: object
                .learnings
                .into_iter()
                .filter(|l| !l.content.trim().is_empty())
                .take(caps.max_findings)
                .map(|l| Finding::new(l.content, l.confidence))
                .collect(),
            follow_ups: object
                .follow_up_questions
                .into_iter()
                .filter(|f| !f.question.trim().is_empty())
                .take(caps.max_follow_ups)
                .map(|f| FollowUp {
                    question: f.question,
                    priority: clamp_priority(f.priority),
                    reason: f.reason,
                })
                .collect(),
            source_quality: object.source_quality,
        };
        debug!(
            query,
            findings = synthesis.findings.len(),
            follow_ups = synthesis.follow_ups.len(),
            gaps = synthesis.source_quality.content_gaps.len(),
            "Synthesis complete"
        );
        Ok(synthesis)
    }

    fn build_prompt(
        &self,
        query: &str,
        documents: &[RankedDocument],
        research_goal: Option<&str>,
        caps: SynthesisCaps,
    ) -> String {
        let mut prompt = format!(
            "Given the following contents from a SERP search for the query <query>{query}</query>, \
             generate a list of learnings from the contents. Return a maximum of {} learnings, but feel free \
             to return less if the contents are clear. Make sure each learning is unique and not similar to each other. \
             The learnings should be concise and to the point, as detailed and information dense as possible. \
             Make sure to include any entities like people, places, companies, products, things, etc in the learnings, \
             as well as any exact metrics, numbers, or dates.\n\n",
            caps.max_findings
        );
        let goal = research_goal.filter(|g| !g.trim().is_empty());
        if let Some(goal) = goal {
            let _ = write!(
                prompt,
                "Research Goal: {goal}\nFocus on findings that contribute to this goal.\n\n"
            );
        }
        prompt.push_str(
            "Weight information by source reliability: be more confident in information from highly reliable sources \
             and more cautious about information from less reliable sources. If possible, verify information from \
             less reliable sources against more reliable ones.\n\n",
        );
        let _ = write!(
            prompt,
            "Also generate up to {} follow-up questions, prioritized by reliability gaps and research needs{}.\n\n<contents>",
            caps.max_follow_ups,
            if goal.is_some() {
                ", keeping in mind the research goal"
            } else {
                ""
            }
        );
        for doc in documents {
            let content = self.counter.trim(&doc.content, self.document_tokens);
            let _ = write!(
                prompt,
                "<content reliability=\"{:.2}\" reasoning=\"{}\" source=\"{}\">\n{}\n</content>\n",
                doc.source.reliability_score,
                doc.source.reliability_reasoning.replace('"', "'"),
                doc.source.domain,
                content
            );
        }
        prompt.push_str("</contents>");
        prompt
    }
}

fn clamp_priority(priority: Option<f64>) -> u8 {
    match priority {
        Some(p) if p.is_finite() => p.round().clamp(1.0, 5.0) as u8,
        _ => super::model::ResearchDirection::DEFAULT_PRIORITY,
    }
}

fn schema(caps: SynthesisCaps) -> Value {
    json!({
        "type": "object",
        "properties": {
            "learnings": {
                "type": "array",
                "description": format!("List of learnings, max of {}", caps.max_findings),
                "items": {
                    "type": "object",
                    "properties": {
                        "content": { "type": "string" },
                        "confidence": {
                            "type": "number",
                            "description": "Confidence in this learning based on source reliability (0 to 1)"
                        },
                        "sources": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Source domains that support this learning"
                        }
                    },
                    "required": ["content", "confidence"]
                }
            },
            "followUpQuestions": {
                "type": "array",
                "description": format!(
                    "Follow-up questions to research, max of {}, prioritized by reliability gaps",
                    caps.max_follow_ups
                ),
                "items": {
                    "type": "object",
                    "properties": {
                        "question": { "type": "string" },
                        "priority": {
                            "type": "number",
                            "description": "Priority (1-5) based on current source reliability gaps"
                        },
                        "reason": { "type": "string" }
                    },
                    "required": ["question"]
                }
            },
            "sourceQuality": {
                "type": "object",
                "properties": {
                    "mostReliableSources": { "type": "array", "items": { "type": "string" } },
                    "contentGaps": { "type": "array", "items": { "type": "string" } },
                    "reliabilityAnalysis": { "type": "string" }
                }
            }
        },
        "required": ["learnings", "followUpQuestions"]
    })
}
