//! Web search / content fetch collaborator.
//!
//! The research tree only needs "give me documents for this query"; the
//! `SearchProvider` trait is that seam. `FirecrawlProvider` is the production
//! implementation and `MockSearchProvider` serves canned documents in tests.

pub mod firecrawl;

use crate::error::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub use firecrawl::FirecrawlProvider;

/// One fetched document. Every field is optional; documents without a URL
/// cannot be attributed and are skipped downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub url: Option<String>,
    pub title: Option<String>,
    pub text: Option<String>,
}

impl SearchDocument {
    pub fn new(url: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            title: Some(title.into()),
            text: Some(text.into()),
        }
    }
}

/// Requested content format for fetched pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    #[default]
    Markdown,
    Html,
}

impl ContentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentFormat::Markdown => "markdown",
            ContentFormat::Html => "html",
        }
    }
}

/// Options for a single search call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub limit: usize,
    pub timeout: Duration,
    pub format: ContentFormat,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            timeout: Duration::from_secs(15),
            format: ContentFormat::Markdown,
        }
    }
}

/// Trait for search providers.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Search for `query` and return the fetched documents.
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchDocument>, SearchError>;
}

/// Canned answer for a mock search.
#[derive(Debug, Clone)]
pub enum MockSearchResponse {
    Documents(Vec<SearchDocument>),
    Timeout,
    Error(String),
}

/// A mock search provider for tests.
///
/// Responses are matched by exact query first, then by the first registered
/// substring contained in the query; anything else gets the fallback.
pub struct MockSearchProvider {
    exact: HashMap<String, MockSearchResponse>,
    contains: Vec<(String, MockSearchResponse)>,
    fallback: MockSearchResponse,
    calls: Mutex<Vec<(String, SearchOptions)>>,
}

impl Default for MockSearchProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSearchProvider {
    /// A provider that returns no documents for any query.
    pub fn new() -> Self {
        Self {
            exact: HashMap::new(),
            contains: Vec::new(),
            fallback: MockSearchResponse::Documents(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A provider that returns the same documents for every query.
    pub fn always(documents: Vec<SearchDocument>) -> Self {
        Self::new().with_fallback(MockSearchResponse::Documents(documents))
    }

    pub fn with_fallback(mut self, response: MockSearchResponse) -> Self {
        self.fallback = response;
        self
    }

    pub fn on_query(mut self, query: impl Into<String>, response: MockSearchResponse) -> Self {
        self.exact.insert(query.into(), response);
        self
    }

    pub fn on_query_containing(
        mut self,
        needle: impl Into<String>,
        response: MockSearchResponse,
    ) -> Self {
        self.contains.push((needle.into(), response));
        self
    }

    /// Every `(query, options)` pair searched so far.
    pub fn calls(&self) -> Vec<(String, SearchOptions)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn response_for(&self, query: &str) -> &MockSearchResponse {
        self.exact
            .get(query)
            .or_else(|| {
                self.contains
                    .iter()
                    .find(|(needle, _)| query.contains(needle.as_str()))
                    .map(|(_, response)| response)
            })
            .unwrap_or(&self.fallback)
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchDocument>, SearchError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((query.to_string(), options.clone()));

        match self.response_for(query) {
            MockSearchResponse::Documents(docs) => {
                Ok(docs.iter().take(options.limit).cloned().collect())
            }
            MockSearchResponse::Timeout => Err(SearchError::Timeout {
                timeout_secs: options.timeout.as_secs(),
            }),
            MockSearchResponse::Error(message) => Err(SearchError::Request {
                message: message.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(n: usize) -> SearchDocument {
        SearchDocument::new(
            format!("https://example.org/{n}"),
            format!("Doc {n}"),
            "body",
        )
    }

    #[tokio::test]
    async fn test_mock_respects_limit_and_records_calls() {
        let provider = MockSearchProvider::always((0..10).map(doc).collect());
        let options = SearchOptions {
            limit: 3,
            ..Default::default()
        };
        let docs = provider.search("gutenberg", &options).await.unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(provider.calls()[0].0, "gutenberg");
        assert_eq!(provider.calls()[0].1.limit, 3);
    }

    #[tokio::test]
    async fn test_mock_matching_order() {
        let provider = MockSearchProvider::new()
            .on_query("exact query", MockSearchResponse::Error("boom".into()))
            .on_query_containing("exact", MockSearchResponse::Timeout);

        let options = SearchOptions::default();
        assert!(matches!(
            provider.search("exact query", &options).await,
            Err(SearchError::Request { .. })
        ));
        assert!(matches!(
            provider.search("an exact match", &options).await,
            Err(SearchError::Timeout { timeout_secs: 15 })
        ));
        assert!(provider.search("other", &options).await.unwrap().is_empty());
        assert_eq!(provider.call_count(), 3);
    }

    #[test]
    fn test_content_format_str() {
        assert_eq!(ContentFormat::Markdown.as_str(), "markdown");
        assert_eq!(SearchOptions::default().format, ContentFormat::Markdown);
    }
}
