use serde::Serialize;
use simdup_config::SimilarityThresholds;
use simdup_core::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonType {
    ExactMatch,
    SemanticSimilarity,
    StructuralSimilarity,
}

impl ComparisonType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExactMatch => "exact_match",
            Self::SemanticSimilarity => "semantic_similarity",
            Self::StructuralSimilarity => "structural_similarity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    IdenticalImplementation,
    CopyPasteError,
    SimilarFunctionality,
    RefactorCandidate,
}

impl DuplicateReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IdenticalImplementation => "identical_implementation",
            Self::CopyPasteError => "copy_paste_error",
            Self::SimilarFunctionality => "similar_functionality",
            Self::RefactorCandidate => "refactor_candidate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// A classified pair of distinct symbols.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateResult {
    pub symbol_a: Symbol,
    pub symbol_b: Symbol,
    pub similarity_score: f32,
    pub confidence: f32,
    pub reason: DuplicateReason,
    pub comparison_type: ComparisonType,
    pub severity: Severity,
}

impl DuplicateResult {
    pub fn new(
        symbol_a: Symbol,
        symbol_b: Symbol,
        similarity_score: f32,
        thresholds: &SimilarityThresholds,
    ) -> Self {
        let same_file = symbol_a.file_path == symbol_b.file_path;
        let (comparison_type, reason) = classify(similarity_score, same_file, thresholds);
        Self {
            symbol_a,
            symbol_b,
            similarity_score,
            confidence: confidence(similarity_score, thresholds),
            reason,
            comparison_type,
            severity: severity(similarity_score, thresholds),
        }
    }
}

/// Checked top-down: exact, then high, then everything that reached the query.
pub fn classify(
    score: f32,
    same_file: bool,
    thresholds: &SimilarityThresholds,
) -> (ComparisonType, DuplicateReason) {
    if score >= thresholds.exact() {
        (
            ComparisonType::ExactMatch,
            DuplicateReason::IdenticalImplementation,
        )
    } else if score >= thresholds.high() {
        let reason = if same_file {
            DuplicateReason::SimilarFunctionality
        } else {
            DuplicateReason::CopyPasteError
        };
        (ComparisonType::SemanticSimilarity, reason)
    } else {
        (
            ComparisonType::StructuralSimilarity,
            DuplicateReason::RefactorCandidate,
        )
    }
}

pub fn severity(score: f32, thresholds: &SimilarityThresholds) -> Severity {
    if score >= thresholds.exact() {
        Severity::Critical
    } else if score >= thresholds.high() {
        Severity::High
    } else if score >= thresholds.medium() {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// `min(1, score / exact)` rounded to three decimals.
pub fn confidence(score: f32, thresholds: &SimilarityThresholds) -> f32 {
    let ratio = (score / thresholds.exact()).min(1.0);
    (ratio * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_resolve_to_the_higher_tier() {
        let thresholds = SimilarityThresholds::default();

        assert_eq!(
            classify(thresholds.exact(), false, &thresholds),
            (
                ComparisonType::ExactMatch,
                DuplicateReason::IdenticalImplementation
            )
        );
        assert_eq!(
            classify(thresholds.high(), false, &thresholds),
            (
                ComparisonType::SemanticSimilarity,
                DuplicateReason::CopyPasteError
            )
        );
        assert_eq!(
            classify(thresholds.high(), true, &thresholds).1,
            DuplicateReason::SimilarFunctionality
        );
        assert_eq!(
            classify(thresholds.medium(), true, &thresholds),
            (
                ComparisonType::StructuralSimilarity,
                DuplicateReason::RefactorCandidate
            )
        );
    }

    #[test]
    fn severity_follows_the_threshold_ladder() {
        let thresholds = SimilarityThresholds::default();
        assert_eq!(severity(1.0, &thresholds), Severity::Critical);
        assert_eq!(severity(0.95, &thresholds), Severity::Critical);
        assert_eq!(severity(0.9, &thresholds), Severity::High);
        assert_eq!(severity(0.8, &thresholds), Severity::Medium);
        assert_eq!(severity(0.7, &thresholds), Severity::Low);
    }

    #[test]
    fn confidence_is_capped_and_rounded() {
        let thresholds = SimilarityThresholds::default();
        assert_eq!(confidence(1.0, &thresholds), 1.0);
        assert_eq!(confidence(0.8, &thresholds), 0.842);
    }
}
