//! Cross-encoder reranking for precise query shapes

use fastembed::{RerankInitOptions, TextRerank};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    Initialization(String),

    #[error("Reranking failed: {0}")]
    Reranking(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Abstraction so tests can rerank deterministically
pub trait EvidenceReranker: Send + Sync {
    /// Returns (candidate index, score) pairs sorted by score descending
    fn rerank(
        &self,
        query: &str,
        candidates: &[String],
        top_k: usize,
    ) -> Result<Vec<(usize, f32)>, RerankError>;
}

/// FastEmbed cross-encoder reranker
pub struct FastEmbedReranker {
    model: Arc<TextRerank>,
}

impl FastEmbedReranker {
    pub fn new() -> Result<Self, RerankError> {
        tracing::info!("Initializing reranker model (downloads if not cached)");

        let init_options = RerankInitOptions::new(fastembed::RerankerModel::BGERerankerBase)
            .with_show_download_progress(true);
        let model = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::Initialization(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
        })
    }
}

impl EvidenceReranker for FastEmbedReranker {
    fn rerank(
        &self,
        query: &str,
        candidates: &[String],
        top_k: usize,
    ) -> Result<Vec<(usize, f32)>, RerankError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        if query.is_empty() {
            return Err(RerankError::InvalidInput("Query cannot be empty".to_string()));
        }

        let documents: Vec<&str> = candidates.iter().map(|s| s.as_str()).collect();
        let results = self
            .model
            .rerank(query, documents, true, Some(top_k))
            .map_err(|e| RerankError::Reranking(e.to_string()))?;

        let mut scored: Vec<(usize, f32)> =
            results.into_iter().map(|r| (r.index, r.score)).collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Requires model download - run with: cargo test -- --ignored
    fn test_rerank_prefers_relevant_memory() {
        let reranker = FastEmbedReranker::new().unwrap();

        let query = "where did I have dinner on my birthday?";
        let candidates = vec![
            "Birthday dinner at the Italian restaurant downtown".to_string(),
            "Morning commute on the train".to_string(),
            "Grocery shopping for the week".to_string(),
        ];

        let results = reranker.rerank(query, &candidates, 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 0);
    }
}
