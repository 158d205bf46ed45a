pub mod classify;
pub mod discovery;
pub mod error;
pub mod file_state;
pub mod finder;
pub mod progress;
pub mod report;

pub use classify::{ComparisonType, DuplicateReason, DuplicateResult, Severity};
pub use error::{
    EXIT_ANALYSIS_FAILED, EXIT_CONFIGURATION, EXIT_DEPENDENCY_UNAVAILABLE, FinderError,
};
pub use finder::DuplicateFinder;
pub use progress::{Progress, ProgressStage, StageTransition};
pub use report::{DuplicateReport, Finding, ReportSummary};
