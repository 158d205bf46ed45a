use thiserror::Error;

use crate::progress::ProgressStage;

pub const EXIT_ANALYSIS_FAILED: i32 = 1;
pub const EXIT_DEPENDENCY_UNAVAILABLE: i32 = 2;
pub const EXIT_CONFIGURATION: i32 = 8;

/// A pipeline failure tagged with the stage it happened in.
#[derive(Debug, Error)]
pub enum FinderError {
    #[error("{stage}: required component unavailable: {message}")]
    Dependency {
        stage: ProgressStage,
        message: String,
    },
    #[error("{stage}: symbol extraction failed: {message}")]
    SymbolExtraction {
        stage: ProgressStage,
        message: String,
    },
    #[error("{stage}: embedding generation failed: {message}")]
    Embedding {
        stage: ProgressStage,
        message: String,
    },
    #[error("{stage}: similarity search failed: {message}")]
    Similarity {
        stage: ProgressStage,
        message: String,
    },
    #[error("{stage}: invalid configuration: {message}")]
    Configuration {
        stage: ProgressStage,
        message: String,
    },
}

impl FinderError {
    pub fn dependency(stage: ProgressStage, err: impl std::fmt::Display) -> Self {
        Self::Dependency {
            stage,
            message: err.to_string(),
        }
    }

    pub fn extraction(stage: ProgressStage, err: impl std::fmt::Display) -> Self {
        Self::SymbolExtraction {
            stage,
            message: err.to_string(),
        }
    }

    pub fn embedding(stage: ProgressStage, err: impl std::fmt::Display) -> Self {
        Self::Embedding {
            stage,
            message: err.to_string(),
        }
    }

    pub fn similarity(stage: ProgressStage, err: impl std::fmt::Display) -> Self {
        Self::Similarity {
            stage,
            message: err.to_string(),
        }
    }

    pub fn configuration(stage: ProgressStage, err: impl std::fmt::Display) -> Self {
        Self::Configuration {
            stage,
            message: err.to_string(),
        }
    }

    pub fn stage(&self) -> ProgressStage {
        match self {
            Self::Dependency { stage, .. }
            | Self::SymbolExtraction { stage, .. }
            | Self::Embedding { stage, .. }
            | Self::Similarity { stage, .. }
            | Self::Configuration { stage, .. } => *stage,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Dependency { .. } => EXIT_DEPENDENCY_UNAVAILABLE,
            Self::Configuration { .. } => EXIT_CONFIGURATION,
            Self::SymbolExtraction { .. } | Self::Embedding { .. } | Self::Similarity { .. } => {
                EXIT_ANALYSIS_FAILED
            }
        }
    }
}
