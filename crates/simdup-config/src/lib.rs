use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use simdup_core::SymbolKind;
use thiserror::Error;

pub const SIMDUP_DIR_NAME: &str = ".simdup";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_COLLECTION: &str = "code_symbols";
pub const DEFAULT_CANDLE_MODEL: &str = "Qwen/Qwen3-Embedding-0.6B";
pub const DEFAULT_MOCK_DIMENSION: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    #[default]
    Full,
    Incremental,
    Targeted,
}

impl AnalysisMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::Targeted => "targeted",
        }
    }
}

impl std::str::FromStr for AnalysisMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            "targeted" => Ok(Self::Targeted),
            other => Err(format!(
                "invalid analysis mode '{other}', expected one of: full, incremental, targeted"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackendKind {
    #[default]
    Sqlite,
    Memory,
}

impl VectorBackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }
}

impl std::str::FromStr for VectorBackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "invalid vector backend '{other}', expected one of: sqlite, memory"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    #[default]
    Mock,
    Candle,
}

impl EmbeddingProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Candle => "candle",
        }
    }
}

impl std::str::FromStr for EmbeddingProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "mock" => Ok(Self::Mock),
            "candle" => Ok(Self::Candle),
            other => Err(format!(
                "invalid embedding provider '{other}', expected one of: mock, candle"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceSpace {
    #[default]
    Cosine,
}

/// Similarity cutoffs, `0 <= low < medium < high < exact <= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawThresholds", into = "RawThresholds")]
pub struct SimilarityThresholds {
    low: f32,
    medium: f32,
    high: f32,
    exact: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawThresholds {
    #[serde(default = "default_low_threshold")]
    low: f32,
    #[serde(default = "default_medium_threshold")]
    medium: f32,
    #[serde(default = "default_high_threshold")]
    high: f32,
    #[serde(default = "default_exact_threshold")]
    exact: f32,
}

impl SimilarityThresholds {
    pub fn new(low: f32, medium: f32, high: f32, exact: f32) -> Result<Self, ConfigError> {
        let named = [("low", low), ("medium", medium), ("high", high), ("exact", exact)];
        for (name, value) in named {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if !(low < medium && medium < high && high < exact) {
            return Err(ConfigError::ThresholdOrder {
                low,
                medium,
                high,
                exact,
            });
        }

        Ok(Self {
            low,
            medium,
            high,
            exact,
        })
    }

    pub fn low(&self) -> f32 {
        self.low
    }

    pub fn medium(&self) -> f32 {
        self.medium
    }

    pub fn high(&self) -> f32 {
        self.high
    }

    pub fn exact(&self) -> f32 {
        self.exact
    }
}

impl Default for SimilarityThresholds {
    fn default() -> Self {
        Self {
            low: default_low_threshold(),
            medium: default_medium_threshold(),
            high: default_high_threshold(),
            exact: default_exact_threshold(),
        }
    }
}

impl TryFrom<RawThresholds> for SimilarityThresholds {
    type Error = ConfigError;

    fn try_from(raw: RawThresholds) -> Result<Self, Self::Error> {
        Self::new(raw.low, raw.medium, raw.high, raw.exact)
    }
}

impl From<SimilarityThresholds> for RawThresholds {
    fn from(thresholds: SimilarityThresholds) -> Self {
        Self {
            low: thresholds.low,
            medium: thresholds.medium,
            high: thresholds.high,
            exact: thresholds.exact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SimdupConfig {
    #[serde(default)]
    pub finder: FinderConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinderConfig {
    #[serde(default)]
    pub analysis_mode: AnalysisMode,
    #[serde(default = "default_finder_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_symbols")]
    pub max_symbols: usize,
    #[serde(default = "default_true")]
    pub enable_caching: bool,
    #[serde(default = "default_true")]
    pub enable_incremental: bool,
    #[serde(default = "default_max_memory_gb")]
    pub max_memory_gb: f64,
    #[serde(default = "default_include_symbol_types")]
    pub include_symbol_types: Vec<SymbolKind>,
    #[serde(default = "default_exclude_file_patterns")]
    pub exclude_file_patterns: Vec<String>,
    #[serde(default = "default_min_symbol_length")]
    pub min_symbol_length: usize,
    #[serde(default)]
    pub thresholds: SimilarityThresholds,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            analysis_mode: AnalysisMode::Full,
            batch_size: default_finder_batch_size(),
            max_symbols: default_max_symbols(),
            enable_caching: true,
            enable_incremental: true,
            max_memory_gb: default_max_memory_gb(),
            include_symbol_types: default_include_symbol_types(),
            exclude_file_patterns: default_exclude_file_patterns(),
            min_symbol_length: default_min_symbol_length(),
            thresholds: SimilarityThresholds::default(),
        }
    }
}

/// Construction parameters of a graph-based ANN index.
///
/// The defaults trade a little recall for faster search. Backends that search
/// exhaustively accept and report them without using them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    #[serde(default)]
    pub space: DistanceSpace,
    #[serde(default = "default_index_m")]
    pub m: usize,
    #[serde(default = "default_construction_ef")]
    pub construction_ef: usize,
    #[serde(default = "default_search_ef")]
    pub search_ef: usize,
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            space: DistanceSpace::Cosine,
            m: default_index_m(),
            construction_ef: default_construction_ef(),
            search_ef: default_search_ef(),
            num_threads: default_num_threads(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: VectorBackendKind,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Relative paths resolve against the workspace's `.simdup` directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_dir: Option<PathBuf>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_true")]
    pub enable_pooling: bool,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enable_query_cache: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,
    #[serde(default = "default_true")]
    pub enable_async: bool,
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
    #[serde(default)]
    pub index: IndexParams,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackendKind::Sqlite,
            collection: default_collection(),
            persist_dir: None,
            max_results: default_max_results(),
            enable_pooling: true,
            max_connections: default_max_connections(),
            connection_timeout_secs: default_connection_timeout_secs(),
            enable_query_cache: true,
            cache_ttl_secs: default_cache_ttl_secs(),
            max_cache_entries: default_max_cache_entries(),
            enable_async: true,
            max_concurrent_queries: default_max_concurrent_queries(),
            search_timeout_secs: default_search_timeout_secs(),
            index: IndexParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_mock_dimension")]
    pub dimension: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_true")]
    pub normalize: bool,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Mock,
            model: None,
            dimension: default_mock_dimension(),
            batch_size: default_embedding_batch_size(),
            normalize: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("threshold '{name}' must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f32 },
    #[error(
        "thresholds must satisfy low < medium < high < exact, got {low} / {medium} / {high} / {exact}"
    )]
    ThresholdOrder {
        low: f32,
        medium: f32,
        high: f32,
        exact: f32,
    },
    #[error("'{0}' must be greater than zero")]
    ZeroValue(&'static str),
}

pub fn simdup_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(SIMDUP_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    simdup_dir(workspace_root).join(CONFIG_FILE_NAME)
}

/// Directory the persistent vector backend writes into.
pub fn vector_store_dir(workspace_root: impl AsRef<Path>, store: &StoreConfig) -> PathBuf {
    let base = simdup_dir(workspace_root);
    match &store.persist_dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => base.join(dir),
        None => base.join("vectors"),
    }
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<SimdupConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(SimdupConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: SimdupConfig = toml::from_str(&raw)?;
    let config = normalize_config(parsed);
    validate_config(&config)?;
    Ok(config)
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<SimdupConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(simdup_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = SimdupConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

pub fn validate_config(config: &SimdupConfig) -> Result<(), ConfigError> {
    let non_zero = [
        ("finder.batch_size", config.finder.batch_size),
        ("finder.max_symbols", config.finder.max_symbols),
        ("store.max_results", config.store.max_results),
        ("store.max_connections", config.store.max_connections),
        ("store.max_cache_entries", config.store.max_cache_entries),
        ("store.max_concurrent_queries", config.store.max_concurrent_queries),
        ("embeddings.batch_size", config.embeddings.batch_size),
        ("embeddings.dimension", config.embeddings.dimension),
    ];
    for (name, value) in non_zero {
        if value == 0 {
            return Err(ConfigError::ZeroValue(name));
        }
    }
    Ok(())
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_config(mut config: SimdupConfig) -> SimdupConfig {
    config.embeddings.model = normalize_optional(config.embeddings.model.take());

    let collection = config.store.collection.trim();
    if collection.is_empty() {
        config.store.collection = default_collection();
    } else {
        config.store.collection = collection.to_owned();
    }

    config.finder.include_symbol_types.sort();
    config.finder.include_symbol_types.dedup();
    config.finder.exclude_file_patterns = config
        .finder
        .exclude_file_patterns
        .into_iter()
        .map(|pattern| pattern.trim().to_owned())
        .filter(|pattern| !pattern.is_empty())
        .collect();

    config
}

fn default_true() -> bool {
    true
}

fn default_low_threshold() -> f32 {
    0.65
}

fn default_medium_threshold() -> f32 {
    0.75
}

fn default_high_threshold() -> f32 {
    0.85
}

fn default_exact_threshold() -> f32 {
    0.95
}

fn default_finder_batch_size() -> usize {
    100
}

fn default_max_symbols() -> usize {
    10_000
}

fn default_max_memory_gb() -> f64 {
    2.0
}

fn default_include_symbol_types() -> Vec<SymbolKind> {
    vec![
        SymbolKind::Function,
        SymbolKind::Class,
        SymbolKind::Method,
        SymbolKind::Variable,
        SymbolKind::Constant,
        SymbolKind::Interface,
        SymbolKind::Type,
    ]
}

fn default_exclude_file_patterns() -> Vec<String> {
    [
        "node_modules/*",
        ".git/*",
        "build/*",
        "dist/*",
        "coverage/*",
        "*.min.js",
        "__pycache__/*",
        "*.pyc",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

fn default_min_symbol_length() -> usize {
    10
}

fn default_index_m() -> usize {
    16
}

fn default_construction_ef() -> usize {
    400
}

fn default_search_ef() -> usize {
    128
}

fn default_num_threads() -> usize {
    4
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_owned()
}

fn default_max_results() -> usize {
    100
}

fn default_max_connections() -> usize {
    5
}

fn default_connection_timeout_secs() -> u64 {
    30
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_max_cache_entries() -> usize {
    1000
}

fn default_max_concurrent_queries() -> usize {
    5
}

fn default_search_timeout_secs() -> u64 {
    30
}

fn default_mock_dimension() -> usize {
    DEFAULT_MOCK_DIMENSION
}

fn default_embedding_batch_size() -> usize {
    32
}
