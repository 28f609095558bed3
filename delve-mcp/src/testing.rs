//! Scripted research stack shared by the unit tests.

use delve_core::brain::{Generator, MockLlmProvider, user_prompt};
use delve_core::config::ResearchConfig;
use delve_core::research::DeepResearch;
use delve_core::search::{MockSearchProvider, SearchDocument};
use serde_json::json;
use std::sync::Arc;

/// A provider that answers every research prompt with canned JSON.
pub(crate) fn scripted_llm() -> Arc<MockLlmProvider> {
    Arc::new(MockLlmProvider::with_handler(|request| {
        let prompt = user_prompt(request);
        let value = if prompt.contains("generate a list of SERP queries") {
            json!({"queries": [
                {"query": "gutenberg press 1440", "researchGoal": "origins", "isVerificationQuery": false},
                {"query": "printing press spread", "researchGoal": "diffusion", "isVerificationQuery": false}
            ]})
        } else if prompt.starts_with("Evaluate the reliability") {
            json!({"score": 0.9, "reasoning": "Encyclopedic reference", "use": true})
        } else if prompt.starts_with("Given the following contents") {
            json!({
                "learnings": [{"content": "Gutenberg's press dates to about 1440.", "confidence": 0.9, "sources": []}],
                "followUpQuestions": []
            })
        } else {
            json!({"reportMarkdown": "# The Printing Press\n\nBody."})
        };
        Ok(MockLlmProvider::json_response(value))
    }))
}

pub(crate) fn research_with(
    llm: Arc<MockLlmProvider>,
) -> (Arc<DeepResearch>, Arc<MockLlmProvider>) {
    let search = Arc::new(MockSearchProvider::always(vec![SearchDocument::new(
        "https://www.britannica.com/technology/printing-press",
        "Printing press",
        "Johannes Gutenberg developed a movable-type press around 1440.",
    )]));
    let research = DeepResearch::new(
        Generator::new(llm.clone()),
        search,
        ResearchConfig::default(),
    );
    (Arc::new(research), llm)
}
