//! Hybrid retrieval over the context indexes

pub mod evidence;
pub mod fusion;
pub mod hybrid;
pub mod rerank;

pub use evidence::assemble_evidence;
pub use fusion::{reciprocal_rank_fusion, FusionConfig, FusionError};
pub use hybrid::{HybridRetriever, SearchError};
pub use rerank::{EvidenceReranker, FastEmbedReranker, RerankError};

use crate::query::UnderstoodQuery;
use crate::storage::models::ContextRecord;

/// One ranked candidate
#[derive(Debug, Clone)]
pub struct ScoredContext {
    pub context: ContextRecord,
    pub score: f32,
    /// Keyword-channel snippet, when that channel surfaced the hit
    pub snippet: Option<String>,
}

/// Final retrieval output handed to response generation
#[derive(Debug)]
pub struct EvidenceSet {
    pub query: UnderstoodQuery,
    pub evidence: Vec<ScoredContext>,
    /// True when the search deadline expired before completion
    pub timed_out: bool,
}

impl EvidenceSet {
    pub fn empty(query: UnderstoodQuery) -> Self {
        Self {
            query,
            evidence: Vec::new(),
            timed_out: false,
        }
    }
}
