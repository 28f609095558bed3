//! Firecrawl search + scrape provider.
//!
//! Calls `POST {base}/v1/search` with scrape options so each hit comes back
//! with its page content. A self-hosted instance (custom base URL) needs no
//! API key; the hosted API does.

use super::{SearchDocument, SearchOptions, SearchProvider};
use crate::config::SearchConfig;
use crate::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const HOSTED_BASE_URL: &str = "https://api.firecrawl.dev";

/// Firecrawl search provider.
pub struct FirecrawlProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    data: Vec<SearchHit>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    url: Option<String>,
    title: Option<String>,
    markdown: Option<String>,
    html: Option<String>,
    description: Option<String>,
    #[serde(default)]
    metadata: Option<HitMetadata>,
}

#[derive(Debug, Deserialize)]
struct HitMetadata {
    title: Option<String>,
    #[serde(rename = "sourceURL")]
    source_url: Option<String>,
}

impl From<SearchHit> for SearchDocument {
    fn from(hit: SearchHit) -> Self {
        let (meta_title, meta_url) = hit
            .metadata
            .map(|m| (m.title, m.source_url))
            .unwrap_or((None, None));
        SearchDocument {
            url: hit.url.or(meta_url),
            title: hit.title.or(meta_title),
            text: hit.markdown.or(hit.html).or(hit.description),
        }
    }
}

impl FirecrawlProvider {
    /// Create a provider from configuration.
    ///
    /// With a custom `base_url` no key is required; otherwise the key comes
    /// from `config.api_key` or the `config.api_key_env` variable.
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let (base_url, api_key) = match &config.base_url {
            Some(url) => (url.clone(), None),
            None => {
                let key = config
                    .api_key
                    .clone()
                    .or_else(|| std::env::var(&config.api_key_env).ok())
                    .ok_or_else(|| SearchError::NotConfigured {
                        message: format!(
                            "set {} or search.base_url for a self-hosted instance",
                            config.api_key_env
                        ),
                    })?;
                (HOSTED_BASE_URL.to_string(), Some(key))
            }
        };

        let client = Client::builder()
            .user_agent(concat!("delve/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::Request {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request_body(query: &str, options: &SearchOptions) -> serde_json::Value {
        json!({
            "query": query,
            "limit": options.limit,
            "timeout": options.timeout.as_millis() as u64,
            "scrapeOptions": { "formats": [options.format.as_str()] },
        })
    }

    fn parse_body(body: &str) -> Result<Vec<SearchDocument>, SearchError> {
        let parsed: SearchResponse =
            serde_json::from_str(body).map_err(|e| SearchError::Response {
                message: format!("Invalid JSON: {}", e),
            })?;
        if parsed.success == Some(false) {
            return Err(SearchError::Response {
                message: parsed
                    .error
                    .unwrap_or_else(|| "search reported failure".to_string()),
            });
        }
        Ok(parsed.data.into_iter().map(SearchDocument::from).collect())
    }
}

#[async_trait]
impl SearchProvider for FirecrawlProvider {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchDocument>, SearchError> {
        let url = format!("{}/v1/search", self.base_url);
        debug!(url = %url, query = %query, limit = options.limit, "Sending search request");

        let mut request = self
            .client
            .post(&url)
            .timeout(options.timeout)
            .json(&Self::request_body(query, options));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SearchError::Timeout {
                    timeout_secs: options.timeout.as_secs(),
                }
            } else {
                SearchError::Request {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| SearchError::Request {
            message: format!("Failed to read response body: {}", e),
        })?;
        if !status.is_success() {
            return Err(SearchError::Request {
                message: format!("HTTP {}: {}", status, body),
            });
        }

        Self::parse_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_self_hosted_needs_no_key() {
        let config = SearchConfig {
            base_url: Some("http://localhost:3002/".to_string()),
            api_key_env: "DELVE_TEST_UNSET_FIRECRAWL".to_string(),
            ..SearchConfig::default()
        };
        let provider = FirecrawlProvider::new(&config).unwrap();
        assert_eq!(provider.base_url, "http://localhost:3002");
        assert!(provider.api_key.is_none());
    }

    #[test]
    fn test_hosted_requires_key() {
        let config = SearchConfig {
            api_key_env: "DELVE_TEST_UNSET_FIRECRAWL".to_string(),
            ..SearchConfig::default()
        };
        assert!(matches!(
            FirecrawlProvider::new(&config),
            Err(SearchError::NotConfigured { .. })
        ));
    }

    #[test]
    fn test_request_body() {
        let options = SearchOptions {
            limit: 8,
            timeout: Duration::from_secs(15),
            ..Default::default()
        };
        let body = FirecrawlProvider::request_body("printing press", &options);
        assert_eq!(body["limit"], 8);
        assert_eq!(body["timeout"], 15000);
        assert_eq!(body["scrapeOptions"]["formats"][0], "markdown");
    }

    #[test]
    fn test_parse_body_maps_hits() {
        let body = r##"{
            "success": true,
            "data": [
                {"url": "https://en.wikipedia.org/wiki/Printing_press", "title": "Printing press", "markdown": "# Printing press"},
                {"metadata": {"title": "Meta title", "sourceURL": "https://example.org/a"}, "description": "snippet"},
                {"title": "No url"}
            ]
        }"##;
        let docs = FirecrawlProvider::parse_body(body).unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].text.as_deref(), Some("# Printing press"));
        assert_eq!(docs[1].url.as_deref(), Some("https://example.org/a"));
        assert_eq!(docs[1].title.as_deref(), Some("Meta title"));
        assert_eq!(docs[1].text.as_deref(), Some("snippet"));
        assert!(docs[2].url.is_none());
    }

    #[test]
    fn test_parse_body_failure() {
        let result = FirecrawlProvider::parse_body(r#"{"success": false, "error": "quota"}"#);
        assert!(matches!(result, Err(SearchError::Response { message }) if message == "quota"));
    }
}
