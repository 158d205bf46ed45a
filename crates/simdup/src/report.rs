use serde::Serialize;
use simdup_config::{AnalysisMode, FinderConfig, SimilarityThresholds};
use simdup_core::Symbol;
use simdup_infer::EngineInfo;
use simdup_parse::{ExtractionStats, SemanticSourceInfo};
use simdup_store::StoreStats;

use crate::classify::{DuplicateResult, Severity};

pub const DETECTION_METHOD: &str = "embedding_cosine_similarity";
const EVIDENCE_CONTENT_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateReport {
    pub findings: Vec<Finding>,
    pub summary: ReportSummary,
    pub metadata: ReportMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub file_path: String,
    pub line_number: usize,
    pub evidence: Evidence,
}

#[derive(Debug, Clone, Serialize)]
pub struct Evidence {
    pub similarity_score: f32,
    pub confidence: f32,
    pub comparison_type: String,
    pub reason: String,
    pub symbol_a: EvidenceSymbol,
    pub symbol_b: EvidenceSymbol,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceSymbol {
    pub name: String,
    pub kind: String,
    pub file_path: String,
    pub line_number: usize,
    pub line_count: usize,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityBreakdown {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    /// Kept in the report layout for consumers that expect it. Pairs below
    /// the low threshold are never reported, so this stays zero.
    pub info: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total_duplicates_found: usize,
    pub symbols_analyzed: usize,
    pub execution_time_seconds: f64,
    pub severity_breakdown: SeverityBreakdown,
    pub detection_method: String,
    pub thresholds: SimilarityThresholds,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentInfo {
    pub extractor: ExtractionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_source: Option<SemanticSourceInfo>,
    pub embedding: EngineInfo,
    pub vector_store: StoreStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub symbols_extracted: usize,
    pub embeddings_generated: usize,
    pub duplicates_found: usize,
    pub execution_time: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub project_root: String,
    pub analysis_mode: AnalysisMode,
    pub component_info: ComponentInfo,
    pub configuration: FinderConfig,
    pub stats: RunStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_files: Option<Vec<String>>,
    pub timestamp: String,
}

/// Everything about a run that is not a finding.
pub struct ReportContext {
    pub project_root: String,
    pub analysis_mode: AnalysisMode,
    pub component_info: ComponentInfo,
    pub configuration: FinderConfig,
    pub stats: RunStats,
    pub changed_files: Option<Vec<String>>,
    pub verbose: bool,
}

impl DuplicateReport {
    pub fn build(duplicates: &[DuplicateResult], context: ReportContext) -> Self {
        let findings = duplicates
            .iter()
            .enumerate()
            .map(|(index, duplicate)| finding(index, duplicate, context.verbose))
            .collect::<Vec<_>>();

        let mut severity_breakdown = SeverityBreakdown::default();
        for finding in &findings {
            match finding.severity {
                Severity::Critical => severity_breakdown.critical += 1,
                Severity::High => severity_breakdown.high += 1,
                Severity::Medium => severity_breakdown.medium += 1,
                Severity::Low => severity_breakdown.low += 1,
            }
        }

        Self {
            summary: ReportSummary {
                total_duplicates_found: findings.len(),
                symbols_analyzed: context.stats.symbols_extracted,
                execution_time_seconds: context.stats.execution_time,
                severity_breakdown,
                detection_method: DETECTION_METHOD.to_owned(),
                thresholds: context.configuration.thresholds,
            },
            findings,
            metadata: ReportMetadata {
                project_root: context.project_root,
                analysis_mode: context.analysis_mode,
                component_info: context.component_info,
                configuration: context.configuration,
                stats: context.stats,
                changed_files: context.changed_files,
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}

fn finding(index: usize, duplicate: &DuplicateResult, verbose: bool) -> Finding {
    let comparison_type = duplicate.comparison_type.as_str();
    Finding {
        id: format!("duplicate_{index:04}"),
        title: format!(
            "Duplicate: {} & {}",
            duplicate.symbol_a.name, duplicate.symbol_b.name
        ),
        description: format!(
            "Found {comparison_type} between symbols with {:.3} similarity",
            duplicate.similarity_score
        ),
        severity: duplicate.severity,
        file_path: duplicate.symbol_a.file_path.clone(),
        line_number: duplicate.symbol_a.line_number,
        evidence: Evidence {
            similarity_score: duplicate.similarity_score,
            confidence: duplicate.confidence,
            comparison_type: comparison_type.to_owned(),
            reason: duplicate.reason.as_str().to_owned(),
            symbol_a: evidence_symbol(&duplicate.symbol_a, verbose),
            symbol_b: evidence_symbol(&duplicate.symbol_b, verbose),
        },
    }
}

fn evidence_symbol(symbol: &Symbol, verbose: bool) -> EvidenceSymbol {
    let content = if verbose {
        symbol.content.clone()
    } else {
        truncate_chars(&symbol.content, EVIDENCE_CONTENT_CHARS)
    };
    EvidenceSymbol {
        name: symbol.name.clone(),
        kind: symbol.kind.as_str().to_owned(),
        file_path: symbol.file_path.clone(),
        line_number: symbol.line_number,
        line_count: symbol.line_count,
        content,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_owned(),
    }
}
