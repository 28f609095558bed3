//! Progress reporting for the research tree.
//!
//! Progress is a side channel: sinks observe snapshots, and a failing sink is
//! logged and otherwise ignored.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::warn;

/// Snapshot of one orchestrator invocation's progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchProgress {
    pub current_depth: usize,
    pub total_depth: usize,
    pub current_breadth: usize,
    pub total_breadth: usize,
    pub total_queries: usize,
    pub completed_queries: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learnings_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learnings: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_questions: Option<Vec<String>>,
}

impl ResearchProgress {
    pub fn new(depth: usize, breadth: usize) -> Self {
        Self {
            current_depth: depth,
            total_depth: depth,
            current_breadth: breadth,
            total_breadth: breadth,
            ..Default::default()
        }
    }

    /// One-line rendering: `Depth d/D, Query c/T: current query`.
    pub fn message(&self) -> String {
        format!(
            "Depth {}/{}, Query {}/{}: {}",
            self.current_depth,
            self.total_depth,
            self.completed_queries,
            self.total_queries,
            self.current_query.as_deref().unwrap_or("")
        )
    }
}

/// Observer of research progress.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_progress(&self, progress: &ResearchProgress) -> anyhow::Result<()>;
}

/// Sink that discards every update.
pub struct NoOpProgress;

#[async_trait]
impl ProgressSink for NoOpProgress {
    async fn on_progress(&self, _progress: &ResearchProgress) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Sink that keeps every snapshot, for tests and post-run inspection.
#[derive(Default)]
pub struct RecordingProgress {
    snapshots: Mutex<Vec<ResearchProgress>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<ResearchProgress> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingProgress {
    async fn on_progress(&self, progress: &ResearchProgress) -> anyhow::Result<()> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(progress.clone());
        Ok(())
    }
}

/// Sink that forwards snapshots over an unbounded channel.
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ResearchProgress>,
}

impl ChannelProgress {
    pub fn new(tx: mpsc::UnboundedSender<ResearchProgress>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProgressSink for ChannelProgress {
    async fn on_progress(&self, progress: &ResearchProgress) -> anyhow::Result<()> {
        self.tx
            .send(progress.clone())
            .map_err(|_| anyhow::anyhow!("progress receiver dropped"))
    }
}

/// Owns one invocation's snapshot and pushes it to the sink after each update.
pub(crate) struct ProgressReporter {
    state: Mutex<ResearchProgress>,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressReporter {
    pub(crate) fn new(initial: ResearchProgress, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            state: Mutex::new(initial),
            sink,
        }
    }

    /// Apply `update` to the snapshot, then notify the sink with a copy.
    pub(crate) async fn update<F>(&self, update: F)
    where
        F: FnOnce(&mut ResearchProgress),
    {
        let snapshot = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            update(&mut state);
            state.clone()
        };
        if let Err(e) = self.sink.on_progress(&snapshot).await {
            warn!(error = %e, "Progress sink failed; continuing");
        }
    }
}
