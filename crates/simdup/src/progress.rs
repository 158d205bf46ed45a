use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Initializing,
    ExtractingSymbols,
    GeneratingEmbeddings,
    BuildingIndex,
    FindingDuplicates,
    FormattingResults,
    Completed,
    Failed,
}

impl ProgressStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::ExtractingSymbols => "extracting_symbols",
            Self::GeneratingEmbeddings => "generating_embeddings",
            Self::BuildingIndex => "building_index",
            Self::FindingDuplicates => "finding_duplicates",
            Self::FormattingResults => "formatting_results",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The stage that must directly precede `self`, if any.
    fn predecessor(self) -> Option<Self> {
        match self {
            Self::Initializing | Self::Failed => None,
            Self::ExtractingSymbols => Some(Self::Initializing),
            Self::GeneratingEmbeddings => Some(Self::ExtractingSymbols),
            Self::BuildingIndex => Some(Self::GeneratingEmbeddings),
            Self::FindingDuplicates => Some(Self::BuildingIndex),
            Self::FormattingResults => Some(Self::FindingDuplicates),
            Self::Completed => Some(Self::FormattingResults),
        }
    }
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTransition {
    pub stage: ProgressStage,
    pub elapsed_ms: u128,
}

/// Pipeline state for one run. Stages advance strictly in order and any
/// stage may move to [`ProgressStage::Failed`].
#[derive(Debug, Clone)]
pub struct Progress {
    current: ProgressStage,
    history: Vec<StageTransition>,
    started: Instant,
    failure: Option<String>,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress {
    pub fn new() -> Self {
        Self {
            current: ProgressStage::Initializing,
            history: vec![StageTransition {
                stage: ProgressStage::Initializing,
                elapsed_ms: 0,
            }],
            started: Instant::now(),
            failure: None,
        }
    }

    pub fn current(&self) -> ProgressStage {
        self.current
    }

    pub fn history(&self) -> &[StageTransition] {
        &self.history
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Moves to `next`. Out-of-order moves are logged and ignored.
    pub fn advance(&mut self, next: ProgressStage) {
        if next == ProgressStage::Failed || next.predecessor() != Some(self.current) {
            tracing::warn!(
                from = self.current.as_str(),
                to = next.as_str(),
                "ignoring out-of-order stage transition"
            );
            return;
        }
        self.record(next);
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(stage = self.current.as_str(), reason = %reason, "pipeline failed");
        self.failure = Some(reason);
        self.record(ProgressStage::Failed);
    }

    fn record(&mut self, stage: ProgressStage) {
        let elapsed_ms = self.started.elapsed().as_millis();
        tracing::info!(
            from = self.current.as_str(),
            to = stage.as_str(),
            elapsed_ms = elapsed_ms as u64,
            "stage transition"
        );
        self.current = stage;
        self.history.push(StageTransition { stage, elapsed_ms });
    }
}
