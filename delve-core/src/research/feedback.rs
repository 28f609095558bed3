//! Clarifying questions asked before research starts.

use super::prompt::system_prompt;
use crate::brain::Generator;
use crate::error::LlmError;
use serde::Deserialize;
use serde_json::json;
use std::fmt::Write as _;

/// Default number of clarifying questions.
pub const DEFAULT_QUESTIONS: usize = 3;

#[derive(Debug, Deserialize)]
struct GeneratedQuestions {
    questions: Vec<String>,
}

/// Ask for up to `max_questions` questions that clarify the research direction.
pub async fn generate_feedback(
    generator: &Generator,
    query: &str,
    max_questions: usize,
) -> Result<Vec<String>, LlmError> {
    let prompt = format!(
        "Given the following query from the user, ask some follow up questions to clarify the research direction. \
         Return a maximum of {max_questions} questions, but feel free to return less if the original query is clear: \
         <query>{query}</query>"
    );
    let schema = json!({
        "type": "object",
        "properties": {
            "questions": {
                "type": "array",
                "items": { "type": "string" },
                "description": format!(
                    "Follow up questions to clarify the research direction, max of {max_questions}"
                )
            }
        },
        "required": ["questions"]
    });
    let generated = generator
        .generate_object::<GeneratedQuestions>(&system_prompt(), &prompt, &schema)
        .await?;
    Ok(generated
        .object
        .questions
        .into_iter()
        .filter(|q| !q.trim().is_empty())
        .take(max_questions)
        .collect())
}

/// Fold the clarifying answers into one research query.
///
/// Questions without an answer get an empty `A:` line.
pub fn combine_query(initial: &str, questions: &[String], answers: &[String]) -> String {
    if questions.is_empty() {
        return initial.to_string();
    }
    let mut combined = format!("Initial Query: {initial}\nFollow-up Questions and Answers:");
    for (i, question) in questions.iter().enumerate() {
        let answer = answers.get(i).map(String::as_str).unwrap_or_default();
        let _ = write!(combined, "\nQ: {question}\nA: {answer}");
    }
    combined
}
