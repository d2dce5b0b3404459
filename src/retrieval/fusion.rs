//! Reciprocal Rank Fusion over the two search channels

use ahash::AHashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid weight configuration: weights must be positive")]
    InvalidWeights,
}

#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f32,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
}

impl FusionConfig {
    pub fn new(rrf_k: f32, semantic_weight: f32, keyword_weight: f32) -> Result<Self, FusionError> {
        if semantic_weight <= 0.0 || keyword_weight <= 0.0 {
            return Err(FusionError::InvalidWeights);
        }
        Ok(Self {
            rrf_k,
            semantic_weight,
            keyword_weight,
        })
    }
}

/// Fuse two ranked lists with weighted RRF.
///
/// score(id) = sum over rankings of weight / (k + rank). Original channel
/// scores only matter through their ordering.
pub fn reciprocal_rank_fusion(
    semantic_results: Vec<(String, f32)>,
    keyword_results: Vec<(String, f32)>,
    config: &FusionConfig,
) -> Vec<(String, f32)> {
    let mut scores: AHashMap<String, f32> = AHashMap::new();

    for (rank, (id, _)) in semantic_results.into_iter().enumerate() {
        let rrf = config.semantic_weight / (config.rrf_k + rank as f32 + 1.0);
        *scores.entry(id).or_insert(0.0) += rrf;
    }
    for (rank, (id, _)) in keyword_results.into_iter().enumerate() {
        let rrf = config.keyword_weight / (config.rrf_k + rank as f32 + 1.0);
        *scores.entry(id).or_insert(0.0) += rrf;
    }

    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}
