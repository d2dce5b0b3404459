//! HNSW vector index with metadata payloads
//!
//! The HNSW graph handles unfiltered approximate search. Every vector also
//! keeps a payload (user, type, time window, entities) in a side map; filtered
//! queries with a date range bypass the graph and scan the payload-matching
//! subset exactly, so a time filter is a hard pre-scoring constraint rather
//! than a post-hoc trim of approximate results.

use crate::taxonomy::ContextType;
use ahash::AHashMap;
use hnsw_rs::prelude::*;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Insert failed: {0}")]
    Insert(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// Metadata carried alongside each indexed vector
#[derive(Debug, Clone)]
pub struct IndexPayload {
    pub user_id: String,
    pub context_type: ContextType,
    pub is_episode: bool,
    pub time_start: i64,
    pub time_end: i64,
    pub item_ids: Vec<String>,
    /// Lowercased entity names for entity-match boosting
    pub entity_names: Vec<String>,
}

/// Pre-scoring payload filter. `user_id` is always enforced.
#[derive(Debug, Clone, Default)]
pub struct PayloadFilter {
    pub user_id: String,
    /// Inclusive event-time range; windows must intersect it
    pub time_range: Option<(i64, i64)>,
    pub is_episode: Option<bool>,
    pub context_type: Option<ContextType>,
}

impl PayloadFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn matches(&self, payload: &IndexPayload) -> bool {
        if payload.user_id != self.user_id {
            return false;
        }
        if let Some((start, end)) = self.time_range {
            // Window intersection, both ends inclusive
            if payload.time_end < start || payload.time_start > end {
                return false;
            }
        }
        if let Some(is_episode) = self.is_episode {
            if payload.is_episode != is_episode {
                return false;
            }
        }
        if let Some(context_type) = self.context_type {
            if payload.context_type != context_type {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct VectorSearchResult {
    pub id: String,
    /// Cosine similarity, higher is closer
    pub score: f32,
    pub payload: IndexPayload,
}

struct Entry {
    vector: Vec<f32>,
    payload: IndexPayload,
    internal_id: usize,
}

struct Inner {
    hnsw: Hnsw<'static, f32, DistCosine>,
    entries: AHashMap<String, Entry>,
    /// Maps HNSW internal ids back to context ids; stale ids from replaced
    /// vectors are absent and get skipped during search
    by_internal: AHashMap<usize, String>,
    next_internal: usize,
}

/// Vector index over context embeddings
pub struct VectorIndex {
    inner: RwLock<Inner>,
    dimension: usize,
}

impl VectorIndex {
    pub fn new(dimension: usize, ef_construction: usize, m: usize) -> Self {
        let hnsw = Hnsw::<f32, DistCosine>::new(m, dimension, ef_construction, 200, DistCosine);
        Self {
            inner: RwLock::new(Inner {
                hnsw,
                entries: AHashMap::new(),
                by_internal: AHashMap::new(),
                next_internal: 0,
            }),
            dimension,
        }
    }

    /// Insert or replace the vector for a context id
    pub fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        payload: IndexPayload,
    ) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut inner = self.inner.write().map_err(|e| VectorIndexError::Insert(e.to_string()))?;

        if let Some(old) = inner.entries.get(id) {
            let old_internal = old.internal_id;
            inner.by_internal.remove(&old_internal);
        }

        let internal_id = inner.next_internal;
        inner.next_internal += 1;
        inner.hnsw.insert((&vector, internal_id));
        inner.by_internal.insert(internal_id, id.to_string());
        inner.entries.insert(
            id.to_string(),
            Entry {
                vector,
                payload,
                internal_id,
            },
        );
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<(), VectorIndexError> {
        let mut inner = self.inner.write().map_err(|e| VectorIndexError::Insert(e.to_string()))?;
        if let Some(entry) = inner.entries.remove(id) {
            inner.by_internal.remove(&entry.internal_id);
        }
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.entries.contains_key(id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Search for the k most similar contexts matching the filter.
    ///
    /// Date-filtered queries scan the filtered subset exactly; unfiltered
    /// queries go through the HNSW graph with over-fetch to absorb payload
    /// misses.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
        filter: &PayloadFilter,
    ) -> Result<Vec<VectorSearchResult>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let inner = self.inner.read().map_err(|e| VectorIndexError::Search(e.to_string()))?;

        if filter.time_range.is_some() {
            return Ok(Self::exact_scan(&inner, query, k, filter));
        }

        let fetch = (k * 4).max(ef_search);
        let neighbors = inner.hnsw.search(query, fetch, ef_search);

        let mut results = Vec::with_capacity(k);
        for neighbor in neighbors {
            let Some(id) = inner.by_internal.get(&neighbor.d_id) else {
                continue; // replaced or removed vector
            };
            let Some(entry) = inner.entries.get(id) else {
                continue;
            };
            if !filter.matches(&entry.payload) {
                continue;
            }
            results.push(VectorSearchResult {
                id: id.clone(),
                score: 1.0 - neighbor.distance,
                payload: entry.payload.clone(),
            });
            if results.len() >= k {
                break;
            }
        }
        Ok(results)
    }

    fn exact_scan(
        inner: &Inner,
        query: &[f32],
        k: usize,
        filter: &PayloadFilter,
    ) -> Vec<VectorSearchResult> {
        let mut scored: Vec<VectorSearchResult> = inner
            .entries
            .iter()
            .filter(|(_, entry)| filter.matches(&entry.payload))
            .map(|(id, entry)| VectorSearchResult {
                id: id.clone(),
                score: cosine_similarity(query, &entry.vector),
                payload: entry.payload.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(user: &str, start: i64, end: i64) -> IndexPayload {
        IndexPayload {
            user_id: user.to_string(),
            context_type: ContextType::Activity,
            is_episode: false,
            time_start: start,
            time_end: end,
            item_ids: vec!["i1".to_string()],
            entity_names: vec![],
        }
    }

    fn unit_vec(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_upsert_and_search() {
        let index = VectorIndex::new(8, 50, 16);
        index.upsert("a", unit_vec(8, 0), payload("u1", 100, 200)).unwrap();
        index.upsert("b", unit_vec(8, 1), payload("u1", 100, 200)).unwrap();

        let results = index
            .search(&unit_vec(8, 0), 1, 32, &PayloadFilter::for_user("u1"))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
        assert!(results[0].score > 0.9);
    }

    #[test]
    fn test_user_isolation() {
        let index = VectorIndex::new(8, 50, 16);
        index.upsert("a", unit_vec(8, 0), payload("u1", 100, 200)).unwrap();

        let results = index
            .search(&unit_vec(8, 0), 5, 32, &PayloadFilter::for_user("u2"))
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_time_filter_is_hard_and_inclusive() {
        let index = VectorIndex::new(8, 50, 16);
        index.upsert("in", unit_vec(8, 0), payload("u1", 1000, 2000)).unwrap();
        index.upsert("out", unit_vec(8, 0), payload("u1", 5000, 6000)).unwrap();

        let mut filter = PayloadFilter::for_user("u1");
        filter.time_range = Some((2000, 3000)); // touches "in" at its end exactly
        let results = index.search(&unit_vec(8, 0), 10, 32, &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "in");

        filter.time_range = Some((2001, 3000));
        let results = index.search(&unit_vec(8, 0), 10, 32, &filter).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_upsert_replaces_vector() {
        let index = VectorIndex::new(8, 50, 16);
        index.upsert("a", unit_vec(8, 0), payload("u1", 0, 0)).unwrap();
        index.upsert("a", unit_vec(8, 1), payload("u1", 0, 0)).unwrap();
        assert_eq!(index.len(), 1);

        let results = index
            .search(&unit_vec(8, 1), 2, 32, &PayloadFilter::for_user("u1"))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
        assert!(results[0].score > 0.9);
    }

    #[test]
    fn test_remove() {
        let index = VectorIndex::new(8, 50, 16);
        index.upsert("a", unit_vec(8, 0), payload("u1", 0, 0)).unwrap();
        index.remove("a").unwrap();
        assert!(index.is_empty());

        let results = index
            .search(&unit_vec(8, 0), 5, 32, &PayloadFilter::for_user("u1"))
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_dimension_validation() {
        let index = VectorIndex::new(8, 50, 16);
        let result = index.upsert("a", vec![1.0; 4], payload("u1", 0, 0));
        assert!(matches!(result, Err(VectorIndexError::InvalidDimension { .. })));
    }

    #[test]
    fn test_episode_filter() {
        let index = VectorIndex::new(8, 50, 16);
        let mut ep = payload("u1", 0, 0);
        ep.is_episode = true;
        index.upsert("ep", unit_vec(8, 0), ep).unwrap();
        index.upsert("raw", unit_vec(8, 0), payload("u1", 0, 0)).unwrap();

        let mut filter = PayloadFilter::for_user("u1");
        filter.is_episode = Some(true);
        let results = index.search(&unit_vec(8, 0), 10, 32, &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "ep");
    }
}
