use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use simdup_config::StoreConfig;
use simdup_store::{
    BackendConnection, MemoryBackend, MemoryMonitor, MemoryProbe, Metadata, MetadataFilter,
    SimilarityMatch, StoreError, VectorBackend, VectorRecord, VectorStore,
};

/// Memory backend that counts every query reaching it.
struct CountingBackend {
    inner: MemoryBackend,
    queries: Arc<AtomicUsize>,
}

struct CountingConnection {
    inner: Box<dyn BackendConnection>,
    queries: Arc<AtomicUsize>,
}

impl VectorBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn connect(&self) -> Result<Box<dyn BackendConnection>, StoreError> {
        Ok(Box::new(CountingConnection {
            inner: self.inner.connect()?,
            queries: Arc::clone(&self.queries),
        }))
    }
}

impl BackendConnection for CountingConnection {
    fn upsert(&mut self, records: &[VectorRecord]) -> Result<(), StoreError> {
        self.inner.upsert(records)
    }

    fn query(
        &mut self,
        vector: &[f32],
        k: usize,
        threshold: f32,
        filter: &MetadataFilter,
    ) -> Result<Vec<SimilarityMatch>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(vector, k, threshold, filter)
    }

    fn delete(&mut self, ids: &[String]) -> Result<usize, StoreError> {
        self.inner.delete(ids)
    }

    fn count(&mut self) -> Result<usize, StoreError> {
        self.inner.count()
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.inner.clear()
    }
}

struct FixedUsage(f64);

impl MemoryProbe for FixedUsage {
    fn usage_percent(&self) -> f64 {
        self.0
    }
}

fn counting_store(config: &StoreConfig) -> (VectorStore, Arc<AtomicUsize>) {
    let queries = Arc::new(AtomicUsize::new(0));
    let backend = CountingBackend {
        inner: MemoryBackend::new(),
        queries: Arc::clone(&queries),
    };
    let store = VectorStore::new(Arc::new(backend), config)
        .expect("store")
        .with_monitor(MemoryMonitor::new(Arc::new(FixedUsage(10.0))));
    (store, queries)
}

fn metadata(file: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("file_path".to_owned(), json!(file));
    metadata
}

fn seed(store: &VectorStore) {
    let ids = ["a", "b", "c"].map(str::to_owned).to_vec();
    let vectors = vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0]];
    let metadata = vec![metadata("x.py"), metadata("y.py"), metadata("x.py")];
    assert!(store.upsert(&ids, &vectors, &metadata).expect("upsert"));
}

#[test]
fn repeated_upsert_keeps_one_entry_per_id() {
    let (store, _) = counting_store(&StoreConfig::default());
    seed(&store);
    seed(&store);
    assert_eq!(store.count().expect("count"), 3);

    let removed = store.delete(&["a".to_owned()]).expect("delete");
    assert_eq!(removed, 1);
    assert_eq!(store.count().expect("count"), 2);

    store.clear().expect("clear");
    assert_eq!(store.count().expect("count"), 0);
    assert!(store.is_available());
}

#[test]
fn mismatched_upsert_lengths_are_rejected() {
    let (store, _) = counting_store(&StoreConfig::default());
    let err = store
        .upsert(&["a".to_owned()], &[], &[Metadata::new()])
        .expect_err("length mismatch");
    assert!(matches!(
        err,
        StoreError::LengthMismatch {
            ids: 1,
            vectors: 0,
            metadata: 1
        }
    ));
}

#[test]
fn cached_query_does_not_reach_backend() {
    let (store, queries) = counting_store(&StoreConfig::default());
    seed(&store);

    let filter = MetadataFilter::new();
    let first = store.query(&[1.0, 0.0], 5, 0.5, &filter).expect("first");
    let second = store.query(&[1.0, 0.0], 5, 0.5, &filter).expect("second");

    assert_eq!(first, second);
    assert_eq!(queries.load(Ordering::SeqCst), 1);

    let ids = first.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(first.iter().all(|m| m.score >= 0.5));

    seed(&store);
    store.query(&[1.0, 0.0], 5, 0.5, &filter).expect("after write");
    assert_eq!(queries.load(Ordering::SeqCst), 2);
}

#[test]
fn cached_results_never_fall_below_a_stricter_threshold() {
    let (store, queries) = counting_store(&StoreConfig::default());
    let ids = vec!["edge".to_owned()];
    let vectors = vec![vec![0.75, (1.0f32 - 0.75 * 0.75).sqrt()]];
    assert!(store
        .upsert(&ids, &vectors, &[metadata("x.py")])
        .expect("upsert"));

    let filter = MetadataFilter::new();
    let loose = store.query(&[1.0, 0.0], 5, 0.7496, &filter).expect("loose");
    let strict = store.query(&[1.0, 0.0], 5, 0.7504, &filter).expect("strict");

    assert_eq!(loose.len(), 1);
    assert!(strict.is_empty(), "strict query returned {strict:?}");
    assert_eq!(queries.load(Ordering::SeqCst), 2);
}

#[test]
fn disabled_cache_always_queries_backend() {
    let config = StoreConfig {
        enable_query_cache: false,
        ..StoreConfig::default()
    };
    let (store, queries) = counting_store(&config);
    seed(&store);

    let filter = MetadataFilter::new();
    store.query(&[1.0, 0.0], 5, 0.5, &filter).expect("first");
    store.query(&[1.0, 0.0], 5, 0.5, &filter).expect("second");
    assert_eq!(queries.load(Ordering::SeqCst), 2);
    assert!(store.stats().expect("stats").cache.is_none());
}

#[test]
fn filtered_query_only_returns_matching_metadata() {
    let (store, _) = counting_store(&StoreConfig::default());
    seed(&store);

    let mut filter = MetadataFilter::new();
    filter.insert("file_path".to_owned(), json!("y.py"));
    let matches = store.query(&[1.0, 0.0], 5, 0.0, &filter).expect("query");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, "b");
}

#[test]
fn batch_query_results_are_keyed_by_input_index() {
    let (store, _) = counting_store(&StoreConfig::default());
    let store = store.with_query_batch_size(2);
    seed(&store);

    let vectors = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]];
    let results = store.batch_query(&vectors, 0.95).expect("batch");

    assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    assert_eq!(results[&0][0].id, "c");
    assert_eq!(results[&1][0].id, "a");
    assert_eq!(results[&2], results[&0]);
    assert!(results[&3].is_empty());

    let stats = store.stats().expect("stats");
    assert_eq!(stats.pool.in_use, 0);
}

#[test]
fn sequential_batch_matches_async_batch() {
    let sequential_config = StoreConfig {
        enable_async: false,
        ..StoreConfig::default()
    };
    let (sequential, _) = counting_store(&sequential_config);
    let (concurrent, _) = counting_store(&StoreConfig::default());
    seed(&sequential);
    seed(&concurrent);

    let vectors = vec![vec![1.0, 0.0], vec![0.5, 0.5]];
    assert_eq!(
        sequential.batch_query(&vectors, 0.3).expect("sequential"),
        concurrent.batch_query(&vectors, 0.3).expect("concurrent")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_batch_releases_every_connection() {
    let config = StoreConfig {
        max_connections: 2,
        max_concurrent_queries: 4,
        ..StoreConfig::default()
    };
    let (store, queries) = counting_store(&config);
    seed(&store);

    let vectors = (0..20)
        .map(|i| vec![1.0, i as f32 / 10.0])
        .collect::<Vec<_>>();
    let results = store
        .batch_query_async(&vectors, 0.0)
        .await
        .expect("async batch");

    assert_eq!(results.len(), 20);
    assert_eq!(queries.load(Ordering::SeqCst), 20);
    let pool = store.stats().expect("stats").pool;
    assert_eq!(pool.in_use, 0);
    assert!(pool.created <= 2);
}

#[tokio::test]
async fn blocking_batch_inside_runtime_is_an_error() {
    let (store, queries) = counting_store(&StoreConfig::default());
    seed(&store);

    let err = store
        .batch_query(&[vec![1.0, 0.0]], 0.5)
        .expect_err("nested runtime");
    assert!(matches!(err, StoreError::Runtime(_)));
    assert_eq!(queries.load(Ordering::SeqCst), 0);

    let results = store
        .batch_query_async(&[vec![1.0, 0.0]], 0.5)
        .await
        .expect("async batch");
    assert_eq!(results[&0][0].id, "a");
}
