//! The default command: one research session from the terminal.

use crate::commands::build_research;
use async_trait::async_trait;
use delve_core::persistence::{atomic_write, load_json};
use delve_core::research::{DEFAULT_QUESTIONS, combine_query};
use delve_core::research::ResearchOutcome;
use delve_core::{
    DeepResearch, ProgressSink, ResearchConfig, ResearchOptions, ResearchProgress,
};
use dialoguer::Input;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Arguments for a terminal research session.
#[derive(Debug, Clone)]
pub struct ResearchArgs {
    pub query: Option<String>,
    pub breadth: Option<usize>,
    pub depth: Option<usize>,
    pub token_budget: Option<u64>,
    pub avoid: Option<String>,
    pub model: Option<String>,
    pub output: PathBuf,
    pub json: Option<PathBuf>,
    /// Saved session whose learnings seed this one.
    pub seed: Option<PathBuf>,
    /// Ask clarifying questions before researching.
    pub feedback: bool,
    pub quiet: bool,
}

/// Run a session: gather the query, research, print findings, write the report.
pub async fn run(args: ResearchArgs, workspace: &Path) -> anyhow::Result<()> {
    let research = build_research(workspace)?;
    let existing_learnings = match &args.seed {
        Some(path) => load_seed(path)?,
        None => Vec::new(),
    };

    let session = match args.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        Some(query) => Session {
            query: query.to_string(),
            breadth: args.breadth.unwrap_or(research.config().default_breadth),
            depth: args.depth.unwrap_or(research.config().default_depth),
        },
        None => prompt_session(&args, research.config())?,
    };

    let query = if args.feedback {
        clarify(&research, &session.query, args.quiet).await?
    } else {
        session.query
    };

    status(args.quiet, "\nResearching your topic...\n");
    let options = ResearchOptions::new(session.breadth, session.depth)
        .with_token_budget(args.token_budget)
        .with_source_preferences(args.avoid.clone())
        .with_model(args.model.clone())
        .with_existing_learnings(existing_learnings);
    let progress = Arc::new(StderrProgress::new(args.quiet));
    let outcome = research.run_research(&query, options, progress).await?;

    println!(
        "{}",
        summary_text(&outcome.result.learnings(), &outcome.result.visited_urls)
    );
    if outcome.stats.budget_exhausted {
        status(
            args.quiet,
            &format!(
                "Token budget reached after {} tokens; research stopped early.",
                outcome.stats.tokens_used
            ),
        );
    }

    status(args.quiet, "Writing final report...");
    let report = research
        .compose_report(
            &outcome.query,
            &outcome.result.findings,
            &outcome.result.sources,
            args.model.as_deref(),
        )
        .await?;
    atomic_write(&args.output, report.as_bytes())?;
    println!("\nReport has been saved to {}", args.output.display());

    if let Some(path) = &args.json {
        outcome.save(path)?;
        println!("Session data saved to {}", path.display());
    }
    Ok(())
}

/// Learnings of a session saved with `--json`.
fn load_seed(path: &Path) -> anyhow::Result<Vec<String>> {
    let outcome: ResearchOutcome = load_json(path)?
        .ok_or_else(|| anyhow::anyhow!("No saved session at {}", path.display()))?;
    Ok(outcome.result.learnings())
}

struct Session {
    query: String,
    breadth: usize,
    depth: usize,
}

fn prompt_session(args: &ResearchArgs, config: &ResearchConfig) -> anyhow::Result<Session> {
    let query: String = Input::new()
        .with_prompt("What would you like to research?")
        .interact_text()?;
    let breadth = match args.breadth {
        Some(b) => b,
        None => Input::new()
            .with_prompt("Research breadth (recommended 2-10)")
            .default(config.default_breadth)
            .interact_text()?,
    };
    let depth = match args.depth {
        Some(d) => d,
        None => Input::new()
            .with_prompt("Research depth (recommended 1-5)")
            .default(config.default_depth)
            .interact_text()?,
    };
    Ok(Session {
        query,
        breadth,
        depth,
    })
}

/// Ask the clarifying questions and fold the answers into the query.
///
/// A failed question generation is not fatal; research proceeds with the
/// original query.
async fn clarify(research: &DeepResearch, query: &str, quiet: bool) -> anyhow::Result<String> {
    status(quiet, "Creating research plan...");
    let questions = match research.generate_feedback(query, DEFAULT_QUESTIONS).await {
        Ok(questions) => questions,
        Err(e) => {
            warn!(error = %e, "Could not generate clarifying questions");
            return Ok(query.to_string());
        }
    };
    if questions.is_empty() {
        return Ok(query.to_string());
    }

    eprintln!(
        "\nTo better understand your research needs, please answer these follow-up questions:"
    );
    let mut answers = Vec::with_capacity(questions.len());
    for question in &questions {
        eprintln!("\n{question}");
        let answer: String = Input::new()
            .with_prompt("Your answer")
            .allow_empty(true)
            .interact_text()?;
        answers.push(answer);
    }
    Ok(combine_query(query, &questions, &answers))
}

fn status(quiet: bool, message: &str) {
    if !quiet {
        eprintln!("{message}");
    }
}

/// Learnings and visited URLs as printed after a session.
fn summary_text(learnings: &[String], visited_urls: &[String]) -> String {
    let mut text = String::from("\n\nLearnings:\n\n");
    text.push_str(&learnings.join("\n"));
    let _ = write!(text, "\n\n\nVisited URLs ({}):\n\n", visited_urls.len());
    text.push_str(&visited_urls.join("\n"));
    text
}

/// Prints progress lines to stderr, skipping a line identical to the last.
pub struct StderrProgress {
    quiet: bool,
    last: Mutex<Option<String>>,
}

impl StderrProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            last: Mutex::new(None),
        }
    }

    /// `Some(line)` when `line` differs from the previously accepted one.
    fn accept(&self, line: String) -> Option<String> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_deref() == Some(line.as_str()) {
            return None;
        }
        *last = Some(line.clone());
        Some(line)
    }
}

#[async_trait]
impl ProgressSink for StderrProgress {
    async fn on_progress(&self, progress: &ResearchProgress) -> anyhow::Result<()> {
        if let Some(line) = self.accept(progress.message())
            && !self.quiet
        {
            eprintln!("{line}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot(completed: usize, query: &str) -> ResearchProgress {
        ResearchProgress {
            completed_queries: completed,
            total_queries: 4,
            current_query: Some(query.to_string()),
            ..ResearchProgress::new(2, 4)
        }
    }

    #[test]
    fn test_progress_suppresses_consecutive_duplicates() {
        let sink = StderrProgress::new(true);
        let first = snapshot(0, "gutenberg press");
        assert_eq!(
            sink.accept(first.message()).as_deref(),
            Some("Depth 2/2, Query 0/4: gutenberg press")
        );
        assert!(sink.accept(first.message()).is_none());
        assert!(sink.accept(snapshot(1, "gutenberg press").message()).is_some());
        // Only consecutive repeats are dropped.
        assert!(sink.accept(first.message()).is_some());
    }

    #[tokio::test]
    async fn test_progress_sink_never_fails() {
        let sink = StderrProgress::new(true);
        let snap = snapshot(0, "movable type");
        sink.on_progress(&snap).await.unwrap();
        sink.on_progress(&snap).await.unwrap();
    }

    #[test]
    fn test_summary_text() {
        let text = summary_text(
            &["Gutenberg printed the Bible around 1455".to_string()],
            &[
                "https://www.britannica.com/technology/printing-press".to_string(),
                "https://en.wikipedia.org/wiki/Printing_press".to_string(),
            ],
        );
        assert!(text.contains("Learnings:\n\nGutenberg printed the Bible around 1455"));
        assert!(text.contains("Visited URLs (2):"));
        assert!(text.ends_with("https://en.wikipedia.org/wiki/Printing_press"));
    }

    #[test]
    fn test_load_seed_reads_saved_learnings() {
        use delve_core::research::{Finding, ResearchResult, ResearchStats};

        let result = ResearchResult {
            findings: vec![
                Finding::new("Gutenberg's press used movable metal type", 0.9),
                Finding::new("Printing spread to over 200 cities by 1500", 0.7),
            ],
            ..Default::default()
        };
        let outcome = ResearchOutcome {
            id: uuid::Uuid::new_v4(),
            query: "history of the printing press".into(),
            started_at: chrono::Utc::now(),
            completed_at: chrono::Utc::now(),
            stats: ResearchStats::from_result(&result),
            result,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        outcome.save(&path).unwrap();

        assert_eq!(
            load_seed(&path).unwrap(),
            vec![
                "Gutenberg's press used movable metal type".to_string(),
                "Printing spread to over 200 cities by 1500".to_string(),
            ]
        );
    }

    #[test]
    fn test_load_seed_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_seed(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("No saved session"));
    }

    #[test]
    fn test_summary_text_empty() {
        let text = summary_text(&[], &[]);
        assert!(text.contains("Visited URLs (0):"));
    }
}
