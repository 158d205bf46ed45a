use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{BackendConnection, VectorBackend, rank_matches};
use crate::{Metadata, MetadataFilter, SimilarityMatch, StoreError, VectorRecord};

type Entries = BTreeMap<String, (Vec<f32>, Metadata)>;

/// Process-local backend. Every connection shares the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<Entries>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn connect(&self) -> Result<Box<dyn BackendConnection>, StoreError> {
        Ok(Box::new(MemoryConnection {
            entries: Arc::clone(&self.entries),
        }))
    }
}

struct MemoryConnection {
    entries: Arc<Mutex<Entries>>,
}

impl MemoryConnection {
    fn entries(&self) -> Result<MutexGuard<'_, Entries>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::LockPoisoned("memory backend"))
    }
}

impl BackendConnection for MemoryConnection {
    fn upsert(&mut self, records: &[VectorRecord]) -> Result<(), StoreError> {
        let mut entries = self.entries()?;
        for record in records {
            entries.insert(
                record.id.clone(),
                (record.vector.clone(), record.metadata.clone()),
            );
        }
        Ok(())
    }

    fn query(
        &mut self,
        vector: &[f32],
        k: usize,
        threshold: f32,
        filter: &MetadataFilter,
    ) -> Result<Vec<SimilarityMatch>, StoreError> {
        let entries = self.entries()?;
        let candidates = entries
            .iter()
            .map(|(id, (stored, metadata))| (id.as_str(), stored.as_slice(), metadata));
        Ok(rank_matches(candidates, vector, k, threshold, filter))
    }

    fn delete(&mut self, ids: &[String]) -> Result<usize, StoreError> {
        let mut entries = self.entries()?;
        Ok(ids.iter().filter(|id| entries.remove(*id).is_some()).count())
    }

    fn count(&mut self) -> Result<usize, StoreError> {
        Ok(self.entries()?.len())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.entries()?.clear();
        Ok(())
    }
}
