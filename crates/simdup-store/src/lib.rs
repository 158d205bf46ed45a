use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use simdup_config::{StoreConfig, VectorBackendKind, vector_store_dir};
use thiserror::Error;

mod backend;
mod cache;
mod memory;
mod monitor;
mod pool;
mod sqlite;
mod store;

pub use backend::{BackendConnection, VectorBackend, cosine_similarity, rank_matches};
pub use cache::{CacheStats, QueryCache};
pub use memory::MemoryBackend;
pub use monitor::{MemoryMonitor, MemoryPressure, MemoryProbe, SystemMemoryProbe};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use sqlite::{SQLITE_FILE_NAME, SqliteBackend};
pub use store::{StoreStats, VectorStore};

pub type Metadata = Map<String, Value>;

/// Equality constraints on metadata fields. Ordered so cache keys are stable.
pub type MetadataFilter = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

/// `score` is `max(0, 1 - distance)` under cosine distance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityMatch {
    pub id: String,
    pub score: f32,
    pub distance: f32,
    pub metadata: Metadata,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("upsert received {ids} ids, {vectors} vectors and {metadata} metadata entries")]
    LengthMismatch {
        ids: usize,
        vectors: usize,
        metadata: usize,
    },
    #[error("timed out after {waited_ms}ms waiting for a pooled connection")]
    PoolTimeout { waited_ms: u128 },
    #[error("search timed out after {secs}s")]
    SearchTimeout { secs: u64 },
    #[error("pooled connection was already released")]
    ConnectionReleased,
    #[error("vector backend {backend} unavailable: {message}")]
    Unavailable {
        backend: &'static str,
        message: String,
    },
    #[error("async runtime error: {0}")]
    Runtime(String),
    #[error("failed to lock shared resource: {0}")]
    LockPoisoned(&'static str),
}

/// Builds the configured backend and wraps it in a [`VectorStore`].
///
/// A backend that cannot be opened is reported, never replaced by another one.
pub fn open_vector_store(
    workspace_root: impl AsRef<Path>,
    config: &StoreConfig,
) -> Result<VectorStore, StoreError> {
    let backend: Arc<dyn VectorBackend> = match config.backend {
        VectorBackendKind::Sqlite => {
            let dir = vector_store_dir(workspace_root, config);
            Arc::new(SqliteBackend::open(
                dir.join(SQLITE_FILE_NAME),
                &config.collection,
            )?)
        }
        VectorBackendKind::Memory => Arc::new(MemoryBackend::new()),
    };

    tracing::info!(
        backend = backend.name(),
        collection = %config.collection,
        "opened vector backend"
    );
    VectorStore::new(backend, config)
}

#[cfg(test)]
mod tests {
    use simdup_config::VectorBackendKind;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn sqlite_backend_persists_under_workspace_dir() {
        let temp = tempdir().expect("tempdir");
        let config = StoreConfig::default();

        let store = open_vector_store(temp.path(), &config).expect("open sqlite store");
        store
            .upsert(&["a".to_owned()], &[vec![1.0, 0.0]], &[Metadata::new()])
            .expect("upsert");
        drop(store);

        assert!(
            temp.path()
                .join(".simdup/vectors")
                .join(SQLITE_FILE_NAME)
                .exists()
        );
        let reopened = open_vector_store(temp.path(), &config).expect("reopen");
        assert_eq!(reopened.count().expect("count"), 1);
    }

    #[test]
    fn memory_backend_is_selected_by_config() {
        let config = StoreConfig {
            backend: VectorBackendKind::Memory,
            ..StoreConfig::default()
        };
        let store = open_vector_store("/unused", &config).expect("open memory store");
        assert_eq!(store.stats().expect("stats").backend, "memory");
    }
}
