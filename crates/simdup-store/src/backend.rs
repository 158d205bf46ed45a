use std::cmp::Ordering;

use crate::{Metadata, MetadataFilter, SimilarityMatch, StoreError, VectorRecord};

/// One open handle to a vector backend. Handles are checked out of a
/// [`crate::ConnectionPool`] and used by a single thread at a time.
pub trait BackendConnection: Send {
    fn upsert(&mut self, records: &[VectorRecord]) -> Result<(), StoreError>;

    fn query(
        &mut self,
        vector: &[f32],
        k: usize,
        threshold: f32,
        filter: &MetadataFilter,
    ) -> Result<Vec<SimilarityMatch>, StoreError>;

    fn delete(&mut self, ids: &[String]) -> Result<usize, StoreError>;

    fn count(&mut self) -> Result<usize, StoreError>;

    fn clear(&mut self) -> Result<(), StoreError>;
}

/// Connection factory for one collection.
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn connect(&self) -> Result<Box<dyn BackendConnection>, StoreError>;
}

/// Cosine similarity clamped to `[0, 1]`, i.e. `max(0, 1 - cosine_distance)`.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.is_empty() || right.is_empty() || left.len() != right.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut left_norm_sq = 0.0f32;
    let mut right_norm_sq = 0.0f32;
    for (left_value, right_value) in left.iter().zip(right.iter()) {
        dot += left_value * right_value;
        left_norm_sq += left_value * left_value;
        right_norm_sq += right_value * right_value;
    }
    if left_norm_sq <= f32::EPSILON || right_norm_sq <= f32::EPSILON {
        return 0.0;
    }
    (dot / (left_norm_sq.sqrt() * right_norm_sq.sqrt())).clamp(0.0, 1.0)
}

/// Exhaustive nearest-neighbour ranking shared by the backends.
///
/// Keeps candidates that pass `filter` and score at least `threshold`, sorted by
/// descending score with ties broken by id, truncated to `k`.
pub fn rank_matches<'a, I>(
    candidates: I,
    vector: &[f32],
    k: usize,
    threshold: f32,
    filter: &MetadataFilter,
) -> Vec<SimilarityMatch>
where
    I: IntoIterator<Item = (&'a str, &'a [f32], &'a Metadata)>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut matches = candidates
        .into_iter()
        .filter(|(_, _, metadata)| matches_filter(metadata, filter))
        .filter_map(|(id, stored, metadata)| {
            let score = cosine_similarity(vector, stored);
            (score >= threshold).then(|| SimilarityMatch {
                id: id.to_owned(),
                score,
                distance: 1.0 - score,
                metadata: metadata.clone(),
            })
        })
        .collect::<Vec<_>>();

    matches.sort_by(|left, right| {
        right
            .score
            .partial_cmp(&left.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.id.cmp(&right.id))
    });
    matches.truncate(k);
    matches
}

fn matches_filter(metadata: &Metadata, filter: &MetadataFilter) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}
