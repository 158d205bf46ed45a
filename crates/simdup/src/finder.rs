use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use simdup_config::{AnalysisMode, ConfigError, SimdupConfig, validate_config};
use simdup_core::Symbol;
use simdup_infer::EmbeddingEngine;
use simdup_parse::{DocumentSymbolSource, SymbolExtractor, SymbolFilter};
use simdup_store::{Metadata, MemoryMonitor, VectorStore, open_vector_store};

use crate::classify::DuplicateResult;
use crate::discovery::{discover_files, relative_path};
use crate::error::FinderError;
use crate::file_state::{FileStateRecord, FileStateStore, hash_file, hash_files};
use crate::progress::{Progress, ProgressStage};
use crate::report::{ComponentInfo, DuplicateReport, ReportContext, RunStats};

/// Output of one pass through the detection stages.
struct Detection {
    duplicates: Vec<DuplicateResult>,
    symbols_analyzed: usize,
    embeddings_generated: usize,
}

/// Files an incremental run re-indexes, and files that no longer exist.
#[derive(Default)]
struct IndexPlan {
    targets: Vec<PathBuf>,
    deleted: Vec<String>,
}

/// Drives extraction, embedding, indexing and neighbour search for a
/// workspace, tracking the current stage in [`Progress`].
///
/// Every stage fails fast: the first error moves the run to
/// [`ProgressStage::Failed`] and is returned with the stage it happened in.
pub struct DuplicateFinder {
    workspace_root: PathBuf,
    config: SimdupConfig,
    extractor: SymbolExtractor,
    filter: SymbolFilter,
    engine: EmbeddingEngine,
    store: VectorStore,
    file_state: FileStateStore,
    progress: Progress,
    query_threshold: Option<f32>,
    verbose: bool,
}

impl DuplicateFinder {
    /// Validates `config` and initializes every component. Any component that
    /// cannot start is a [`FinderError::Dependency`].
    pub fn new(workspace_root: impl Into<PathBuf>, config: SimdupConfig) -> Result<Self, FinderError> {
        let workspace_root = workspace_root.into();
        let stage = ProgressStage::Initializing;
        validate_config(&config).map_err(|err| FinderError::configuration(stage, err))?;

        let engine = EmbeddingEngine::from_config(&workspace_root, &config.embeddings)
            .map_err(|err| FinderError::dependency(stage, err))?;

        let mut store_config = config.store.clone();
        store_config.enable_query_cache &= config.finder.enable_caching;
        let store = open_vector_store(&workspace_root, &store_config)
            .map_err(|err| FinderError::dependency(stage, err))?
            .with_monitor(MemoryMonitor::system(Some(config.finder.max_memory_gb)))
            .with_query_batch_size(config.finder.batch_size);

        Self::with_components(workspace_root, config, engine, store)
    }

    /// Builds a finder around an already constructed engine and store.
    pub fn with_components(
        workspace_root: impl Into<PathBuf>,
        config: SimdupConfig,
        engine: EmbeddingEngine,
        store: VectorStore,
    ) -> Result<Self, FinderError> {
        let workspace_root = workspace_root.into();
        let stage = ProgressStage::Initializing;
        validate_config(&config).map_err(|err| FinderError::configuration(stage, err))?;

        let extractor = SymbolExtractor::new(&workspace_root)
            .map_err(|err| FinderError::dependency(stage, err))?;
        let finder_config = &config.finder;
        let filter = SymbolFilter::new(
            finder_config.include_symbol_types.iter().copied(),
            finder_config.min_symbol_length,
            &finder_config.exclude_file_patterns,
        )
        .map_err(|err| FinderError::configuration(stage, err))?;
        let file_state = FileStateStore::open(&workspace_root)
            .map_err(|err| FinderError::dependency(stage, err))?;

        tracing::info!(
            workspace = %workspace_root.display(),
            mode = config.finder.analysis_mode.as_str(),
            embedding_model = %engine.info().model,
            "duplicate finder initialized"
        );

        Ok(Self {
            workspace_root,
            config,
            extractor,
            filter,
            engine,
            store,
            file_state,
            progress: Progress::new(),
            query_threshold: None,
            verbose: false,
        })
    }

    pub fn with_semantic_source(mut self, source: Arc<dyn DocumentSymbolSource>) -> Self {
        self.extractor = self.extractor.with_semantic_source(source);
        self
    }

    /// Keeps full symbol content in report evidence.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Overrides the query threshold used by project and incremental runs.
    pub fn with_query_threshold(mut self, threshold: Option<f32>) -> Self {
        self.query_threshold = threshold;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config(&self) -> &SimdupConfig {
        &self.config
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Finds duplicate pairs among `symbols`, matching against everything
    /// already indexed. `threshold` defaults to the medium threshold.
    pub fn find_duplicates(
        &mut self,
        symbols: &[Symbol],
        threshold: Option<f32>,
    ) -> Result<Vec<DuplicateResult>, FinderError> {
        self.begin_run();
        let result = self.run_detection(symbols.to_vec(), threshold).map(|detection| {
            self.progress.advance(ProgressStage::Completed);
            detection.duplicates
        });
        self.record_failure(result)
    }

    /// Re-indexes every supported file under `root` and reports duplicates.
    ///
    /// Relative roots resolve against the workspace. `patterns` narrows the
    /// file set with globs. The index and file state are rebuilt from scratch.
    pub fn analyze_project(
        &mut self,
        root: &Path,
        patterns: Option<&[String]>,
    ) -> Result<DuplicateReport, FinderError> {
        self.begin_run();
        let result = self.analyze_project_inner(root, patterns);
        self.record_failure(result)
    }

    /// Re-indexes only `changed_files`, or the files whose content hash moved
    /// since the last run when `None`, and reports duplicates involving them.
    ///
    /// Nothing to do is a successful empty report.
    pub fn incremental_analysis(
        &mut self,
        changed_files: Option<&[PathBuf]>,
    ) -> Result<DuplicateReport, FinderError> {
        if changed_files.is_none() && !self.config.finder.enable_incremental {
            tracing::warn!("incremental analysis disabled, running full analysis");
            let root = self.workspace_root.clone();
            return self.analyze_project(&root, None);
        }

        self.begin_run();
        let result = self.incremental_analysis_inner(changed_files);
        self.record_failure(result)
    }

    /// Drops every indexed vector and all recorded file state.
    pub fn clear(&mut self) -> Result<(), FinderError> {
        let stage = self.progress.current();
        self.store
            .clear()
            .map_err(|err| FinderError::similarity(stage, err))?;
        self.file_state
            .clear()
            .map_err(|err| FinderError::dependency(stage, err))?;
        Ok(())
    }

    pub fn component_info(&self) -> Result<ComponentInfo, FinderError> {
        let store_stats = self
            .store
            .stats()
            .map_err(|err| FinderError::similarity(self.progress.current(), err))?;
        Ok(ComponentInfo {
            extractor: self.extractor.stats().clone(),
            semantic_source: self.extractor.semantic_info(),
            embedding: self.engine.info(),
            vector_store: store_stats,
        })
    }

    fn begin_run(&mut self) {
        self.progress = Progress::new();
        self.progress.advance(ProgressStage::ExtractingSymbols);
    }

    fn record_failure<T>(&mut self, result: Result<T, FinderError>) -> Result<T, FinderError> {
        if let Err(err) = &result {
            self.progress.fail(err.to_string());
        }
        result
    }

    fn analyze_project_inner(
        &mut self,
        root: &Path,
        patterns: Option<&[String]>,
    ) -> Result<DuplicateReport, FinderError> {
        let stage = ProgressStage::ExtractingSymbols;
        let scan_root = self
            .workspace_root
            .join(root)
            .components()
            .collect::<PathBuf>();
        if !scan_root.is_dir() {
            return Err(FinderError::configuration(
                stage,
                format!("{} is not a directory", scan_root.display()),
            ));
        }

        self.clear()?;
        let files = discover_files(&self.workspace_root, &scan_root, patterns, &self.filter)
            .map_err(|err| FinderError::configuration(stage, err))?;
        tracing::info!(root = %scan_root.display(), files = files.len(), "starting full analysis");

        let (symbols, records) = self.extract_targets(&files)?;
        let detection = self.run_detection(symbols, self.query_threshold)?;
        self.commit_file_state(&records, &[])?;
        self.finish_report(detection, AnalysisMode::Full, None)
    }

    fn incremental_analysis_inner(
        &mut self,
        changed_files: Option<&[PathBuf]>,
    ) -> Result<DuplicateReport, FinderError> {
        let plan = match changed_files {
            Some(files) => self.plan_from_list(files),
            None => self.plan_from_hashes()?,
        };
        let changed = plan
            .targets
            .iter()
            .map(|path| relative_path(&self.workspace_root, path))
            .chain(plan.deleted.iter().cloned())
            .collect::<Vec<_>>();

        if changed.is_empty() {
            tracing::info!("no changed files, nothing to analyze");
        } else {
            tracing::info!(
                changed = plan.targets.len(),
                deleted = plan.deleted.len(),
                "starting incremental analysis"
            );
        }

        self.purge_stale(&changed)?;
        let (symbols, records) = self.extract_targets(&plan.targets)?;
        let detection = self.run_detection(symbols, self.query_threshold)?;
        self.commit_file_state(&records, &plan.deleted)?;
        self.finish_report(detection, AnalysisMode::Incremental, Some(changed))
    }

    /// Listed files that still exist are re-indexed; missing ones count as deleted.
    fn plan_from_list(&self, files: &[PathBuf]) -> IndexPlan {
        let mut plan = IndexPlan::default();
        for file in files {
            let absolute = if file.is_absolute() {
                file.clone()
            } else {
                self.workspace_root.join(file)
            };
            if absolute.is_file() {
                plan.targets.push(absolute);
            } else {
                plan.deleted.push(relative_path(&self.workspace_root, &absolute));
            }
        }
        plan
    }

    fn plan_from_hashes(&self) -> Result<IndexPlan, FinderError> {
        let stage = ProgressStage::ExtractingSymbols;
        let files = discover_files(&self.workspace_root, &self.workspace_root, None, &self.filter)
            .map_err(|err| FinderError::configuration(stage, err))?;
        let hashes = hash_files(&self.workspace_root, &files);
        let changes = self
            .file_state
            .detect_changes(&hashes)
            .map_err(|err| FinderError::dependency(stage, err))?;

        Ok(IndexPlan {
            targets: changes
                .changed
                .iter()
                .map(|path| self.workspace_root.join(path))
                .collect(),
            deleted: changes.deleted,
        })
    }

    /// Removes the vectors last indexed for each of `paths`.
    fn purge_stale(&self, paths: &[String]) -> Result<(), FinderError> {
        let stage = ProgressStage::ExtractingSymbols;
        let mut removed = 0;
        for path in paths {
            let record = self
                .file_state
                .get(path)
                .map_err(|err| FinderError::dependency(stage, err))?;
            if let Some(record) = record {
                removed += self
                    .store
                    .delete(&record.symbol_ids)
                    .map_err(|err| FinderError::similarity(stage, err))?;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "purged stale vectors");
        }
        Ok(())
    }

    /// Extracts `files` and returns the file state to record once the run
    /// succeeds. Malformed files are recorded with no symbols so their stale
    /// vectors stay purged. Fails only when not a single file could be read.
    fn extract_targets(
        &mut self,
        files: &[PathBuf],
    ) -> Result<(Vec<Symbol>, Vec<FileStateRecord>), FinderError> {
        let batch = self.extractor.extract(files);
        if batch.files.is_empty()
            && let Some((_, err)) = batch.skipped.last()
        {
            return Err(FinderError::extraction(
                ProgressStage::ExtractingSymbols,
                format!(
                    "none of {} files could be read, last error: {err}",
                    batch.skipped.len()
                ),
            ));
        }

        let mut symbols = Vec::with_capacity(batch.symbol_count());
        let mut records = Vec::with_capacity(batch.files.len());
        for file in batch.files {
            if let Some(content_hash) = hash_file(&file.path) {
                records.push(FileStateRecord {
                    file_path: relative_path(&self.workspace_root, &file.path),
                    content_hash,
                    symbol_ids: file.symbols.iter().map(|symbol| symbol.id.clone()).collect(),
                });
            }
            symbols.extend(file.symbols);
        }
        Ok((symbols, records))
    }

    fn commit_file_state(
        &self,
        records: &[FileStateRecord],
        deleted: &[String],
    ) -> Result<(), FinderError> {
        let stage = self.progress.current();
        for record in records {
            self.file_state
                .record(record)
                .map_err(|err| FinderError::dependency(stage, err))?;
        }
        for path in deleted {
            self.file_state
                .remove(path)
                .map_err(|err| FinderError::dependency(stage, err))?;
        }
        Ok(())
    }

    /// Runs the stages from symbol filtering to classification. Expects the
    /// run to be in [`ProgressStage::ExtractingSymbols`] and leaves it in
    /// [`ProgressStage::FormattingResults`].
    fn run_detection(
        &mut self,
        symbols: Vec<Symbol>,
        threshold: Option<f32>,
    ) -> Result<Detection, FinderError> {
        let thresholds = self.config.finder.thresholds;
        let threshold = threshold.unwrap_or(thresholds.medium());
        if !(0.0..=1.0).contains(&threshold) {
            return Err(FinderError::configuration(
                self.progress.current(),
                ConfigError::ThresholdOutOfRange {
                    name: "query",
                    value: threshold,
                },
            ));
        }

        let mut symbols = self.filter.apply(symbols);
        let max_symbols = self.config.finder.max_symbols;
        if symbols.len() > max_symbols {
            tracing::warn!(
                found = symbols.len(),
                max_symbols,
                "symbol count exceeds limit, truncating"
            );
            symbols.truncate(max_symbols);
        }

        self.progress.advance(ProgressStage::GeneratingEmbeddings);
        let stage = ProgressStage::GeneratingEmbeddings;
        let embeddings = self
            .engine
            .generate(&symbols)
            .map_err(|err| FinderError::embedding(stage, err))?;
        if embeddings.len() != symbols.len() {
            return Err(FinderError::embedding(
                stage,
                format!(
                    "model returned {} embeddings for {} symbols",
                    embeddings.len(),
                    symbols.len()
                ),
            ));
        }

        self.progress.advance(ProgressStage::BuildingIndex);
        let stage = ProgressStage::BuildingIndex;
        let ids = symbols
            .iter()
            .map(|symbol| symbol.id.clone())
            .collect::<Vec<_>>();
        let metadata = symbols
            .iter()
            .map(Symbol::to_metadata)
            .collect::<Vec<Metadata>>();
        match self.store.upsert(&ids, &embeddings, &metadata) {
            Ok(true) => {}
            Ok(false) => {
                return Err(FinderError::similarity(stage, "vector store rejected the upsert"));
            }
            Err(err) => return Err(FinderError::similarity(stage, err)),
        }

        self.progress.advance(ProgressStage::FindingDuplicates);
        let stage = ProgressStage::FindingDuplicates;
        let matches = self
            .store
            .batch_query(&embeddings, threshold)
            .map_err(|err| FinderError::similarity(stage, err))?;

        let by_id = symbols
            .iter()
            .map(|symbol| (symbol.id.as_str(), symbol))
            .collect::<HashMap<_, _>>();
        let mut seen = BTreeSet::new();
        let mut pairs = Vec::new();
        for (index, hits) in matches {
            let Some(symbol) = symbols.get(index) else {
                continue;
            };
            for hit in hits {
                if hit.id == symbol.id {
                    continue;
                }
                let pair = if symbol.id < hit.id {
                    (symbol.id.clone(), hit.id.clone())
                } else {
                    (hit.id.clone(), symbol.id.clone())
                };
                if !seen.insert(pair) {
                    continue;
                }

                let other = match by_id.get(hit.id.as_str()) {
                    Some(other) => (*other).clone(),
                    None => match Symbol::from_stored_metadata(&hit.metadata) {
                        Ok(other) => other,
                        Err(err) => {
                            tracing::warn!(
                                id = %hit.id,
                                error = %err,
                                "skipping neighbour with unreadable metadata"
                            );
                            continue;
                        }
                    },
                };
                pairs.push((symbol.clone(), other, hit.score));
            }
        }

        self.progress.advance(ProgressStage::FormattingResults);
        let mut duplicates = pairs
            .into_iter()
            .map(|(a, b, score)| DuplicateResult::new(a, b, score, &thresholds))
            .collect::<Vec<_>>();
        duplicates.sort_by(|left, right| {
            right
                .similarity_score
                .total_cmp(&left.similarity_score)
                .then_with(|| left.symbol_a.id.cmp(&right.symbol_a.id))
                .then_with(|| left.symbol_b.id.cmp(&right.symbol_b.id))
        });

        tracing::info!(
            symbols = symbols.len(),
            threshold,
            duplicates = duplicates.len(),
            "duplicate search finished"
        );
        Ok(Detection {
            duplicates,
            symbols_analyzed: symbols.len(),
            embeddings_generated: embeddings.len(),
        })
    }

    fn finish_report(
        &mut self,
        detection: Detection,
        analysis_mode: AnalysisMode,
        changed_files: Option<Vec<String>>,
    ) -> Result<DuplicateReport, FinderError> {
        if detection.duplicates.is_empty() {
            tracing::info!("no duplicates found");
        }

        let stats = RunStats {
            symbols_extracted: detection.symbols_analyzed,
            embeddings_generated: detection.embeddings_generated,
            duplicates_found: detection.duplicates.len(),
            execution_time: self.progress.elapsed_secs(),
        };
        let report = DuplicateReport::build(
            &detection.duplicates,
            ReportContext {
                project_root: self.workspace_root.display().to_string(),
                analysis_mode,
                component_info: self.component_info()?,
                configuration: self.config.finder.clone(),
                stats,
                changed_files,
                verbose: self.verbose,
            },
        );

        self.progress.advance(ProgressStage::Completed);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use simdup_config::{EmbeddingsConfig, StoreConfig};
    use simdup_core::SymbolKind;
    use simdup_infer::MockEmbeddingModel;
    use simdup_store::MemoryBackend;
    use tempfile::tempdir;

    use super::*;

    fn finder(root: &Path) -> DuplicateFinder {
        let config = SimdupConfig::default();
        let engine = EmbeddingEngine::new(
            Arc::new(MockEmbeddingModel::new(32)),
            &EmbeddingsConfig::default(),
        )
        .expect("engine");
        let store = VectorStore::new(Arc::new(MemoryBackend::new()), &StoreConfig::default())
            .expect("store");
        DuplicateFinder::with_components(root, config, engine, store).expect("finder")
    }

    fn function(name: &str, file: &str, content: &str) -> Symbol {
        Symbol::new(name, SymbolKind::Function, file, 1, content)
    }

    #[test]
    fn successful_run_walks_every_stage_in_order() {
        let temp = tempdir().expect("tempdir");
        let mut finder = finder(temp.path());
        let body = "def total(values):\n    return sum(v for v in values)\n";

        finder
            .find_duplicates(&[function("total", "a.py", body)], None)
            .expect("find");

        let stages = finder
            .progress()
            .history()
            .iter()
            .map(|transition| transition.stage)
            .collect::<Vec<_>>();
        assert_eq!(
            stages,
            vec![
                ProgressStage::Initializing,
                ProgressStage::ExtractingSymbols,
                ProgressStage::GeneratingEmbeddings,
                ProgressStage::BuildingIndex,
                ProgressStage::FindingDuplicates,
                ProgressStage::FormattingResults,
                ProgressStage::Completed,
            ]
        );
    }

    #[test]
    fn out_of_range_threshold_fails_the_run() {
        let temp = tempdir().expect("tempdir");
        let mut finder = finder(temp.path());

        let err = finder
            .find_duplicates(&[], Some(1.5))
            .expect_err("threshold above one");
        assert!(matches!(err, FinderError::Configuration { .. }));
        assert_eq!(finder.progress().current(), ProgressStage::Failed);
        assert!(finder.progress().failure().is_some());
    }
}
