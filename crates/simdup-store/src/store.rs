use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use simdup_config::{IndexParams, StoreConfig};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::backend::VectorBackend;
use crate::cache::{CacheStats, QueryCache};
use crate::monitor::{MemoryMonitor, MemoryPressure};
use crate::pool::{ConnectionPool, PoolStats};
use crate::{Metadata, MetadataFilter, SimilarityMatch, StoreError, VectorRecord};

const DEFAULT_QUERY_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub backend: &'static str,
    pub collection: String,
    pub count: usize,
    pub index: IndexParams,
    pub pool: PoolStats,
    pub cache: Option<CacheStats>,
    pub memory_usage_percent: f64,
    pub memory_pressure: MemoryPressure,
}

/// Collection of id-keyed vectors with nearest-neighbour search.
///
/// Owns the connection pool, the optional query cache and the memory monitor
/// that sizes batch searches.
#[derive(Debug, Clone)]
pub struct VectorStore {
    collection: String,
    pool: Arc<ConnectionPool>,
    cache: Option<Arc<QueryCache>>,
    monitor: MemoryMonitor,
    index: IndexParams,
    max_results: usize,
    enable_async: bool,
    max_concurrent_queries: usize,
    search_timeout: Duration,
    query_batch_size: usize,
}

impl VectorStore {
    /// Wraps `backend` and checks that a connection can be opened.
    pub fn new(backend: Arc<dyn VectorBackend>, config: &StoreConfig) -> Result<Self, StoreError> {
        let max_connections = if config.enable_pooling {
            config.max_connections
        } else {
            1
        };
        let pool = ConnectionPool::new(
            backend,
            max_connections,
            Duration::from_secs(config.connection_timeout_secs),
            config.enable_pooling,
        );
        let cache = config.enable_query_cache.then(|| {
            Arc::new(QueryCache::new(
                config.max_cache_entries,
                Duration::from_secs(config.cache_ttl_secs),
            ))
        });

        let store = Self {
            collection: config.collection.clone(),
            pool,
            cache,
            monitor: MemoryMonitor::system(None),
            index: config.index,
            max_results: config.max_results.max(1),
            enable_async: config.enable_async,
            max_concurrent_queries: config.max_concurrent_queries.max(1),
            search_timeout: Duration::from_secs(config.search_timeout_secs),
            query_batch_size: DEFAULT_QUERY_BATCH_SIZE,
        };

        drop(store.pool.acquire().map_err(|err| StoreError::Unavailable {
            backend: store.pool.backend_name(),
            message: err.to_string(),
        })?);
        Ok(store)
    }

    pub fn with_monitor(mut self, monitor: MemoryMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_query_batch_size(mut self, batch_size: usize) -> Self {
        self.query_batch_size = batch_size.max(1);
        self
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn is_available(&self) -> bool {
        self.pool
            .acquire()
            .and_then(|mut conn| conn.get()?.count())
            .is_ok()
    }

    /// Inserts or replaces one vector per id. The three slices must line up.
    pub fn upsert(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadata: &[Metadata],
    ) -> Result<bool, StoreError> {
        if ids.len() != vectors.len() || ids.len() != metadata.len() {
            return Err(StoreError::LengthMismatch {
                ids: ids.len(),
                vectors: vectors.len(),
                metadata: metadata.len(),
            });
        }
        if ids.is_empty() {
            return Ok(true);
        }

        let records = ids
            .iter()
            .zip(vectors)
            .zip(metadata)
            .map(|((id, vector), metadata)| VectorRecord {
                id: id.clone(),
                vector: vector.clone(),
                metadata: metadata.clone(),
            })
            .collect::<Vec<_>>();

        let mut conn = self.pool.acquire()?;
        conn.get()?.upsert(&records)?;
        self.invalidate_cache();

        tracing::debug!(
            collection = %self.collection,
            upserted = records.len(),
            "upserted vectors"
        );
        Ok(true)
    }

    /// At most `k` matches scoring at least `threshold`, best first.
    pub fn query(
        &self,
        vector: &[f32],
        k: usize,
        threshold: f32,
        filter: &MetadataFilter,
    ) -> Result<Vec<SimilarityMatch>, StoreError> {
        run_query(&self.pool, self.cache.as_deref(), vector, k, threshold, filter)
    }

    /// Runs one query per vector and returns results keyed by input index.
    ///
    /// Drives [`VectorStore::batch_query_async`] on a private runtime. Async
    /// callers already inside a tokio runtime get [`StoreError::Runtime`] and
    /// should await `batch_query_async` instead.
    pub fn batch_query(
        &self,
        vectors: &[Vec<f32>],
        threshold: f32,
    ) -> Result<BTreeMap<usize, Vec<SimilarityMatch>>, StoreError> {
        if !self.enable_async {
            return self.batch_query_sequential(vectors, threshold);
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(StoreError::Runtime(
                "batch_query called inside a tokio runtime, use batch_query_async".to_owned(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|err| StoreError::Runtime(err.to_string()))?;
        runtime.block_on(self.batch_query_async(vectors, threshold))
    }

    /// Concurrent batch search. Queries run in memory-aware sub-batches with
    /// at most `max_concurrent_queries` in flight, each on a pooled connection
    /// under the search timeout. The first failure aborts the batch.
    pub async fn batch_query_async(
        &self,
        vectors: &[Vec<f32>],
        threshold: f32,
    ) -> Result<BTreeMap<usize, Vec<SimilarityMatch>>, StoreError> {
        let mut results = BTreeMap::new();
        let mut offset = 0;

        while offset < vectors.len() {
            let batch_size = self.monitor.adaptive_batch_size(self.query_batch_size);
            let end = (offset + batch_size).min(vectors.len());
            let concurrency = self
                .monitor
                .concurrency_ceiling(self.max_concurrent_queries);
            let semaphore = Arc::new(Semaphore::new(concurrency));
            let mut join_set = JoinSet::new();

            for (index, vector) in vectors[offset..end].iter().enumerate() {
                let index = offset + index;
                let vector = vector.clone();
                let semaphore = Arc::clone(&semaphore);
                let pool = Arc::clone(&self.pool);
                let cache = self.cache.clone();
                let k = self.max_results;
                let search_timeout = self.search_timeout;

                join_set.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| StoreError::Runtime("query semaphore closed".to_owned()))?;

                    let task = tokio::task::spawn_blocking(move || {
                        run_query(
                            &pool,
                            cache.as_deref(),
                            &vector,
                            k,
                            threshold,
                            &MetadataFilter::new(),
                        )
                    });
                    let matches = match tokio::time::timeout(search_timeout, task).await {
                        Ok(Ok(result)) => result?,
                        Ok(Err(err)) => {
                            return Err(StoreError::Runtime(format!(
                                "query task join error: {err}"
                            )));
                        }
                        Err(_) => {
                            return Err(StoreError::SearchTimeout {
                                secs: search_timeout.as_secs(),
                            });
                        }
                    };
                    Ok::<_, StoreError>((index, matches))
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let (index, matches) = joined
                    .map_err(|err| StoreError::Runtime(format!("query task join error: {err}")))??;
                results.insert(index, matches);
            }

            tracing::debug!(
                from = offset,
                to = end,
                concurrency,
                "finished query sub-batch"
            );
            offset = end;
        }

        Ok(results)
    }

    pub fn delete(&self, ids: &[String]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.acquire()?;
        let removed = conn.get()?.delete(ids)?;
        self.invalidate_cache();
        Ok(removed)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let mut conn = self.pool.acquire()?;
        conn.get()?.count()
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire()?;
        conn.get()?.clear()?;
        self.invalidate_cache();
        tracing::info!(collection = %self.collection, "cleared vector collection");
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let usage = self.monitor.usage_percent();
        Ok(StoreStats {
            backend: self.pool.backend_name(),
            collection: self.collection.clone(),
            count: self.count()?,
            index: self.index,
            pool: self.pool.stats(),
            cache: self.cache.as_ref().map(|cache| cache.stats()),
            memory_usage_percent: usage,
            memory_pressure: MemoryPressure::from_usage(usage),
        })
    }

    fn batch_query_sequential(
        &self,
        vectors: &[Vec<f32>],
        threshold: f32,
    ) -> Result<BTreeMap<usize, Vec<SimilarityMatch>>, StoreError> {
        let filter = MetadataFilter::new();
        vectors
            .iter()
            .enumerate()
            .map(|(index, vector)| {
                self.query(vector, self.max_results, threshold, &filter)
                    .map(|matches| (index, matches))
            })
            .collect()
    }

    fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}

fn run_query(
    pool: &Arc<ConnectionPool>,
    cache: Option<&QueryCache>,
    vector: &[f32],
    k: usize,
    threshold: f32,
    filter: &MetadataFilter,
) -> Result<Vec<SimilarityMatch>, StoreError> {
    let key = cache.map(|_| QueryCache::key(vector, k, threshold, filter));
    if let (Some(cache), Some(key)) = (cache, key.as_deref())
        && let Some(hit) = cache.get(key)
    {
        return Ok(hit);
    }

    let mut conn = pool.acquire()?;
    let matches = conn.get()?.query(vector, k, threshold, filter)?;
    drop(conn);

    if let (Some(cache), Some(key)) = (cache, key) {
        cache.insert(key, matches.clone());
    }
    Ok(matches)
}
