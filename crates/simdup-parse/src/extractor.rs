use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use simdup_core::{Language, Symbol, normalize_path};

use crate::error::ParseError;
use crate::fallback::RegexFallback;
use crate::semantic::{DocumentSymbolSource, SemanticSourceInfo};
use crate::syntax::SyntaxExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    Semantic,
    SyntaxTree,
    Regex,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    pub files_processed: usize,
    pub files_failed: usize,
    pub semantic_files: usize,
    pub syntax_tree_files: usize,
    pub regex_files: usize,
    pub symbols_extracted: usize,
}

/// Symbols read from one source file. An empty list still means the file was
/// read and parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSymbols {
    pub path: PathBuf,
    pub symbols: Vec<Symbol>,
}

/// Per-file outcome of [`SymbolExtractor::extract`].
#[derive(Debug, Default)]
pub struct ExtractionBatch {
    pub files: Vec<FileSymbols>,
    pub skipped: Vec<(PathBuf, ParseError)>,
}

impl ExtractionBatch {
    pub fn symbol_count(&self) -> usize {
        self.files.iter().map(|file| file.symbols.len()).sum()
    }

    pub fn into_symbols(self) -> Vec<Symbol> {
        self.files
            .into_iter()
            .flat_map(|file| file.symbols)
            .collect()
    }
}

/// Turns source files into [`Symbol`] records.
///
/// A configured [`DocumentSymbolSource`] is tried first for every file. When it
/// is not loaded, errors, or returns nothing, the file falls back to the
/// tree-sitter grammars and then to the regex patterns.
pub struct SymbolExtractor {
    workspace_root: PathBuf,
    syntax: SyntaxExtractor,
    fallback: RegexFallback,
    semantic: Option<Arc<dyn DocumentSymbolSource>>,
    stats: ExtractionStats,
}

impl SymbolExtractor {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Result<Self, ParseError> {
        Ok(Self {
            workspace_root: workspace_root.into(),
            syntax: SyntaxExtractor::new()?,
            fallback: RegexFallback::new()?,
            semantic: None,
            stats: ExtractionStats::default(),
        })
    }

    pub fn with_semantic_source(mut self, source: Arc<dyn DocumentSymbolSource>) -> Self {
        self.semantic = Some(source);
        self
    }

    pub fn semantic_info(&self) -> Option<SemanticSourceInfo> {
        self.semantic.as_ref().map(|source| source.get_info())
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn stats(&self) -> &ExtractionStats {
        &self.stats
    }

    pub fn supports(&self, path: &Path) -> bool {
        Language::from_path(path).is_some_and(|language| {
            self.syntax.supports(path) || self.fallback.supports(language) || self.semantic.is_some()
        })
    }

    /// Extracts every file, logging and skipping the ones that cannot be read
    /// or have no supported language. Malformed sources count as read.
    pub fn extract(&mut self, file_paths: &[PathBuf]) -> ExtractionBatch {
        let mut batch = ExtractionBatch::default();
        for path in file_paths {
            match self.extract_file(path) {
                Ok(symbols) => batch.files.push(FileSymbols {
                    path: path.clone(),
                    symbols,
                }),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping file");
                    batch.skipped.push((path.clone(), err));
                }
            }
        }

        tracing::info!(
            files = file_paths.len(),
            skipped = batch.skipped.len(),
            symbols = batch.symbol_count(),
            "symbol extraction finished"
        );
        batch
    }

    pub fn extract_file(&mut self, path: &Path) -> Result<Vec<Symbol>, ParseError> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        };
        let relative = self.relative_path(&absolute);

        let result = fs::read_to_string(&absolute)
            .map_err(|source| ParseError::Io {
                path: relative.clone(),
                source,
            })
            .and_then(|source| self.extract_from_source(&relative, &source));

        self.stats.files_processed += 1;
        match result {
            Ok((symbols, strategy)) => {
                match strategy {
                    ExtractionStrategy::Semantic => self.stats.semantic_files += 1,
                    ExtractionStrategy::SyntaxTree => self.stats.syntax_tree_files += 1,
                    ExtractionStrategy::Regex => self.stats.regex_files += 1,
                }
                self.stats.symbols_extracted += symbols.len();
                Ok(symbols)
            }
            Err(err) => {
                self.stats.files_failed += 1;
                Err(err)
            }
        }
    }

    pub fn extract_from_source(
        &mut self,
        file_path: &str,
        source: &str,
    ) -> Result<(Vec<Symbol>, ExtractionStrategy), ParseError> {
        let file_path = normalize_path(file_path);
        let path = Path::new(&file_path);

        if let Some(symbols) = self.extract_semantic(&file_path, source) {
            return Ok((symbols, ExtractionStrategy::Semantic));
        }

        if self.syntax.supports(path) {
            let symbols = self.syntax.extract_from_source(&file_path, source)?;
            return Ok((symbols, ExtractionStrategy::SyntaxTree));
        }

        let language = Language::from_path(path)
            .filter(|language| self.fallback.supports(*language))
            .ok_or_else(|| ParseError::UnsupportedLanguage(file_path.clone()))?;
        Ok((
            self.fallback.extract(language, &file_path, source),
            ExtractionStrategy::Regex,
        ))
    }

    fn extract_semantic(&self, file_path: &str, source: &str) -> Option<Vec<Symbol>> {
        let semantic = self.semantic.as_ref()?;
        if !semantic.is_loaded() {
            return None;
        }

        match semantic.request_document_symbols(file_path) {
            Ok(response) if !response.is_empty() => Some(
                response
                    .iter()
                    .filter_map(|entry| Symbol::from_semantic_response(entry, file_path, source))
                    .collect(),
            ),
            Ok(_) => None,
            Err(err) => {
                tracing::debug!(path = file_path, error = %err, "semantic extraction failed, using syntax fallback");
                None
            }
        }
    }

    fn relative_path(&self, absolute: &Path) -> String {
        let relative = absolute
            .strip_prefix(&self.workspace_root)
            .unwrap_or(absolute);
        normalize_path(&relative.to_string_lossy())
    }
}
