//! Deep research engine.
//!
//! A research run proceeds through these phases:
//! 1. **Plan**: generate up to `breadth` sub-queries from the query, prior
//!    weighted findings, and pending research directions.
//! 2. **Search**: run each sub-query against the search provider.
//! 3. **Evaluate**: score every returned document for reliability and
//!    preference fit.
//! 4. **Synthesize**: extract findings and prioritized follow-up directions
//!    from the documents that clear the sub-query's threshold.
//! 5. **Recurse**: explore each branch again with half the breadth and one
//!    less depth, until depth or the token budget runs out.
//! 6. **Report**: compose a Markdown report with a ranked sources section.

pub mod branch;
pub mod budget;
pub mod evaluator;
pub mod feedback;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod prompt;
pub mod queries;
pub mod report;
pub mod session;
pub mod synthesizer;

pub use budget::{BudgetSnapshot, BudgetTracker};
pub use feedback::{DEFAULT_QUESTIONS, combine_query, generate_feedback};
pub use model::{Finding, ResearchDirection, ResearchResult, SourceRecord, SubQuery};
pub use orchestrator::{ExploreRequest, Orchestrator};
pub use progress::{ChannelProgress, NoOpProgress, ProgressSink, RecordingProgress, ResearchProgress};
pub use report::{ReliabilityDistribution, ReportWriter, sources_section};
pub use session::{DeepResearch, ResearchOptions, ResearchOutcome, ResearchStats};
