//! Hybrid search: semantic + keyword channels fused, boosted, and trimmed

use crate::config::RetrievalConfig;
use crate::embedding::{ContextIndexer, PayloadFilter};
use crate::query::{QueryIntent, QueryShape, UnderstoodQuery};
use crate::retrieval::{
    assemble_evidence, reciprocal_rank_fusion, EvidenceReranker, EvidenceSet, FusionConfig,
    ScoredContext,
};
use crate::storage::models::ContextRecord;
use crate::storage::StorageManager;
use crate::taxonomy::ContextType;
use ahash::AHashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Vector search failed: {0}")]
    VectorSearch(String),

    #[error("Keyword search failed: {0}")]
    KeywordSearch(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Reranking failed: {0}")]
    Reranking(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

pub struct HybridRetriever {
    storage: Arc<StorageManager>,
    indexer: Arc<ContextIndexer>,
    reranker: Option<Arc<dyn EvidenceReranker>>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        storage: Arc<StorageManager>,
        indexer: Arc<ContextIndexer>,
        reranker: Option<Arc<dyn EvidenceReranker>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            storage,
            indexer,
            reranker,
            config,
        }
    }

    /// Retrieve evidence for an understood query.
    ///
    /// Applies the overall search deadline; on expiry an empty, flagged
    /// evidence set comes back instead of an error.
    pub async fn search(
        &self,
        user_id: &str,
        query: &UnderstoodQuery,
    ) -> Result<EvidenceSet, SearchError> {
        if query.intent != QueryIntent::MemoryLookup {
            return Ok(EvidenceSet::empty(query.clone()));
        }
        if query.raw.is_empty() {
            return Err(SearchError::InvalidQuery("Query text cannot be empty".to_string()));
        }

        let deadline = Duration::from_millis(self.config.search_timeout_ms);
        let now_ts = chrono::Utc::now().timestamp();
        match tokio::time::timeout(deadline, self.retrieve(user_id, query, now_ts)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(user_id, "Search deadline expired");
                let mut set = EvidenceSet::empty(query.clone());
                set.timed_out = true;
                Ok(set)
            }
        }
    }

    pub(crate) async fn retrieve(
        &self,
        user_id: &str,
        query: &UnderstoodQuery,
        now_ts: i64,
    ) -> Result<EvidenceSet, SearchError> {
        let fetch = self.config.max_evidence * self.config.search_multiplier;

        let mut filter = PayloadFilter::for_user(user_id);
        filter.time_range = query.date_range;

        let (semantic, keyword) = tokio::join!(
            self.semantic_search(&query.raw, fetch, &filter),
            self.keyword_search(user_id, &query.raw, fetch)
        );
        let semantic = semantic?;
        let (keyword, snippets) = keyword?;

        let fusion_config = FusionConfig::new(
            self.config.rrf_k,
            self.config.semantic_weight,
            self.config.keyword_weight,
        )
        .map_err(|e| SearchError::InvalidQuery(e.to_string()))?;
        let fused = reciprocal_rank_fusion(semantic, keyword, &fusion_config);

        let mut candidates = self.hydrate(fused, &snippets)?;

        // The date filter is hard: the keyword channel cannot pre-filter, so
        // anything outside the range is dropped here before scoring
        if let Some((start, end)) = query.date_range {
            candidates.retain(|c| c.context.window.end >= start && c.context.window.start <= end);
        }

        for candidate in &mut candidates {
            candidate.score = self.boost(candidate.score, &candidate.context, query, now_ts);
        }
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let candidates = if self.config.enable_reranking && query.shape.wants_rerank() {
            self.rerank(&query.raw, candidates)?
        } else {
            candidates
        };

        let mut candidates = candidates;
        if query.shape == QueryShape::Browse {
            // Browsing reads chronologically, newest first
            candidates.sort_by_key(|c| std::cmp::Reverse(c.context.window.start));
        }

        let evidence = assemble_evidence(candidates, self.config.max_evidence);
        Ok(EvidenceSet {
            query: query.clone(),
            evidence,
            timed_out: false,
        })
    }

    async fn semantic_search(
        &self,
        text: &str,
        limit: usize,
        filter: &PayloadFilter,
    ) -> Result<Vec<(String, f32)>, SearchError> {
        let query_vector = self
            .indexer
            .embed_query(text)
            .map_err(|e| SearchError::Embedding(e.to_string()))?;

        let results = self
            .indexer
            .vector_index()
            .search(&query_vector, limit, self.config.hnsw_ef_search, filter)
            .map_err(|e| SearchError::VectorSearch(e.to_string()))?;

        Ok(results.into_iter().map(|r| (r.id, r.score)).collect())
    }

    #[allow(clippy::type_complexity)]
    async fn keyword_search(
        &self,
        user_id: &str,
        text: &str,
        limit: usize,
    ) -> Result<(Vec<(String, f32)>, AHashMap<String, String>), SearchError> {
        let results = self
            .indexer
            .keyword_search(user_id, text, limit)
            .map_err(|e| SearchError::KeywordSearch(e.to_string()))?;

        let mut ranked = Vec::with_capacity(results.len());
        let mut snippets = AHashMap::new();
        for r in results {
            snippets.insert(r.id.clone(), r.snippet);
            ranked.push((r.id, r.score));
        }
        Ok((ranked, snippets))
    }

    fn hydrate(
        &self,
        fused: Vec<(String, f32)>,
        snippets: &AHashMap<String, String>,
    ) -> Result<Vec<ScoredContext>, SearchError> {
        let ids: Vec<String> = fused.iter().map(|(id, _)| id.clone()).collect();
        let scores: AHashMap<String, f32> = fused.into_iter().collect();

        let records = self
            .storage
            .database
            .get_contexts(&ids)
            .map_err(|e| SearchError::Database(e.to_string()))?;

        let mut by_id: AHashMap<String, ContextRecord> =
            records.into_iter().map(|r| (r.id.clone(), r)).collect();

        // Preserve fused order; ids with no row (index ahead of a delete) drop out
        Ok(ids
            .iter()
            .filter_map(|id| {
                by_id.remove(id).map(|context| ScoredContext {
                    score: scores.get(id).copied().unwrap_or(0.0),
                    snippet: snippets.get(id).cloned(),
                    context,
                })
            })
            .collect())
    }

    fn boost(
        &self,
        base: f32,
        context: &ContextRecord,
        query: &UnderstoodQuery,
        now_ts: i64,
    ) -> f32 {
        let mut score = base;

        if context.is_episode && query.shape.is_broad() {
            score *= self.config.episode_boost;
        }
        if context.context_type == ContextType::DailySummary {
            score *= self.config.daily_summary_penalty;
        }

        if !query.entity_mentions.is_empty() {
            let names = context.entity_names();
            let matches = query
                .entity_mentions
                .iter()
                .filter(|mention| {
                    names
                        .iter()
                        .any(|name| name.contains(mention.as_str()) || mention.contains(name.as_str()))
                })
                .count();
            score *= 1.0 + self.config.entity_boost * matches as f32;
        }

        let age_secs = (now_ts - context.window.end).max(0) as f32;
        let age_days = age_secs / 86_400.0;
        score *= 0.5f32.powf(age_days / self.config.recency_half_life_days);

        score
    }

    fn rerank(
        &self,
        query_text: &str,
        mut candidates: Vec<ScoredContext>,
    ) -> Result<Vec<ScoredContext>, SearchError> {
        let Some(reranker) = &self.reranker else {
            return Ok(candidates);
        };
        if candidates.len() < 2 {
            return Ok(candidates);
        }

        let limit = self.config.rerank_candidates_limit.min(candidates.len());
        let tail = candidates.split_off(limit);
        let head = candidates;

        let texts: Vec<String> = head.iter().map(|c| c.context.embed_text.clone()).collect();
        let reranked = reranker
            .rerank(query_text, &texts, limit)
            .map_err(|e| SearchError::Reranking(e.to_string()))?;

        let mut out: Vec<ScoredContext> = reranked
            .into_iter()
            .map(|(idx, new_score)| {
                let mut candidate = head[idx].clone();
                candidate.score = new_score;
                candidate
            })
            .collect();
        // Candidates past the rerank window keep their fused order behind it
        out.extend(tail);
        Ok(out)
    }
}
