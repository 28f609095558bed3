//! Data model for the research tree: findings, sources, directions, and the
//! merged result of one orchestrator invocation.

use super::budget::BudgetSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Reliability assumed for findings that arrive without one.
pub const DEFAULT_RELIABILITY: f64 = 0.5;

/// One atomic extracted fact with its confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub content: String,
    pub reliability: f64,
}

impl Finding {
    /// Create a finding; reliability is clamped into [0, 1].
    pub fn new(content: impl Into<String>, reliability: f64) -> Self {
        Self {
            content: content.into(),
            reliability: clamp_unit(reliability),
        }
    }

    /// A finding carried in from outside the tree, with neutral reliability.
    pub fn unweighted(content: impl Into<String>) -> Self {
        Self::new(content, DEFAULT_RELIABILITY)
    }
}

/// One evaluated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub domain: String,
    pub reliability_score: f64,
    pub reliability_reasoning: String,
}

/// A prioritized follow-up question threaded to the next tree level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchDirection {
    pub question: String,
    /// 1 (low) to 5 (high).
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_goal: Option<String>,
}

impl ResearchDirection {
    pub const DEFAULT_PRIORITY: u8 = 3;

    pub fn new(question: impl Into<String>, priority: u8, parent_goal: Option<String>) -> Self {
        Self {
            question: question.into(),
            priority: priority.clamp(1, 5),
            parent_goal,
        }
    }
}

/// A generated sub-query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQuery {
    pub query: String,
    pub research_goal: String,
    /// Minimum source score used for synthesis, in [0, 1].
    pub reliability_threshold: f64,
    pub is_verification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_direction: Option<String>,
}

/// What one branch contributes before merging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BranchFragment {
    pub findings: Vec<Finding>,
    pub sources: Vec<SourceRecord>,
    pub visited_urls: Vec<String>,
    pub follow_up_directions: Vec<ResearchDirection>,
}

impl BranchFragment {
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty() && self.sources.is_empty() && self.visited_urls.is_empty()
    }
}

/// The aggregate returned by one orchestrator invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResult {
    pub findings: Vec<Finding>,
    pub sources: Vec<SourceRecord>,
    pub visited_urls: Vec<String>,
    pub budget: BudgetSnapshot,
}

impl ResearchResult {
    /// Finding contents, in result order.
    pub fn learnings(&self) -> Vec<String> {
        self.findings.iter().map(|f| f.content.clone()).collect()
    }
}

/// Clamp a score into [0, 1]; NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Host component of a URL, or an empty string when it cannot be parsed.
pub fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Deduplicate findings by exact content.
///
/// The first occurrence fixes the position. A later duplicate with a higher
/// reliability takes that slot whole; no finding is ever edited.
pub fn dedup_findings(findings: impl IntoIterator<Item = Finding>) -> Vec<Finding> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Finding> = Vec::new();
    for finding in findings {
        match index.get(&finding.content) {
            Some(&i) => {
                if finding.reliability > out[i].reliability {
                    out[i] = finding;
                }
            }
            None => {
                index.insert(finding.content.clone(), out.len());
                out.push(finding);
            }
        }
    }
    out
}

/// Deduplicate sources by URL, keeping the highest-scored evaluation.
pub fn dedup_sources(sources: impl IntoIterator<Item = SourceRecord>) -> Vec<SourceRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<SourceRecord> = Vec::new();
    for source in sources {
        match index.get(&source.url) {
            Some(&i) => {
                if source.reliability_score > out[i].reliability_score {
                    out[i] = source;
                }
            }
            None => {
                index.insert(source.url.clone(), out.len());
                out.push(source);
            }
        }
    }
    out
}

/// Deduplicate URLs preserving first-seen order.
pub fn dedup_urls(urls: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|u| seen.insert(u.clone()))
        .collect()
}
