//! Index maintenance for contexts
//!
//! The relational store is the source of truth; both indexes are derived and
//! rebuildable from it. Upserts retry a few times, and a final failure
//! surfaces as an index error so the caller can mark the item degraded
//! instead of failing it.

use crate::config::IndexingConfig;
use crate::embedding::keyword_index::{KeywordIndex, KeywordSearchResult};
use crate::embedding::provider::EmbeddingProvider;
use crate::embedding::vector_index::{IndexPayload, VectorIndex};
use crate::error::{MemoraError, Result};
use crate::storage::models::ContextRecord;
use std::sync::{Arc, Mutex};

pub struct ContextIndexer {
    provider: Arc<dyn EmbeddingProvider>,
    vector_index: Arc<VectorIndex>,
    keyword_index: Mutex<KeywordIndex>,
    retries: usize,
}

impl ContextIndexer {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        config: &IndexingConfig,
        keywords_dir: std::path::PathBuf,
    ) -> Result<Self> {
        let vector_index = Arc::new(VectorIndex::new(
            provider.dimension(),
            config.hnsw_ef_construction,
            config.hnsw_m,
        ));
        let keyword_index = KeywordIndex::new(keywords_dir)
            .map_err(|e| MemoraError::Index(format!("Keyword index init failed: {}", e)))?;

        Ok(Self {
            provider,
            vector_index,
            keyword_index: Mutex::new(keyword_index),
            retries: config.upsert_retries.max(1),
        })
    }

    pub fn payload_for(context: &ContextRecord) -> IndexPayload {
        IndexPayload {
            user_id: context.user_id.clone(),
            context_type: context.context_type,
            is_episode: context.is_episode,
            time_start: context.window.start,
            time_end: context.window.end,
            item_ids: context.item_ids.clone(),
            entity_names: context.entity_names(),
        }
    }

    /// Embed and index one context in both indexes
    pub fn index_context(&self, context: &ContextRecord) -> Result<()> {
        let text = if context.embed_text.is_empty() {
            context.build_embed_text()
        } else {
            context.embed_text.clone()
        };

        let vector = self
            .provider
            .embed(&text)
            .map_err(|e| MemoraError::Index(format!("Embedding failed: {}", e)))?;

        self.with_retries(|| {
            self.vector_index
                .upsert(&context.id, vector.clone(), Self::payload_for(context))
                .map_err(|e| MemoraError::Index(format!("Vector upsert failed: {}", e)))
        })?;

        self.with_retries(|| {
            let mut kw = self.keyword_lock()?;
            kw.upsert(&context.id, &context.user_id, &text)
                .and_then(|_| kw.commit())
                .map_err(|e| MemoraError::Index(format!("Keyword upsert failed: {}", e)))
        })?;

        Ok(())
    }

    /// Index a batch, embedding in one provider call
    pub fn index_contexts(&self, contexts: &[ContextRecord]) -> Result<()> {
        if contexts.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = contexts
            .iter()
            .map(|c| {
                if c.embed_text.is_empty() {
                    c.build_embed_text()
                } else {
                    c.embed_text.clone()
                }
            })
            .collect();

        let vectors = self
            .provider
            .embed_batch(&texts)
            .map_err(|e| MemoraError::Index(format!("Batch embedding failed: {}", e)))?;

        for ((context, text), vector) in contexts.iter().zip(&texts).zip(vectors) {
            self.with_retries(|| {
                self.vector_index
                    .upsert(&context.id, vector.clone(), Self::payload_for(context))
                    .map_err(|e| MemoraError::Index(format!("Vector upsert failed: {}", e)))
            })?;
            let mut kw = self.keyword_lock()?;
            kw.upsert(&context.id, &context.user_id, text)
                .map_err(|e| MemoraError::Index(format!("Keyword upsert failed: {}", e)))?;
        }

        let mut kw = self.keyword_lock()?;
        kw.commit()
            .map_err(|e| MemoraError::Index(format!("Keyword commit failed: {}", e)))?;
        Ok(())
    }

    /// Remove a context from both indexes
    pub fn remove_context(&self, id: &str) -> Result<()> {
        self.vector_index
            .remove(id)
            .map_err(|e| MemoraError::Index(format!("Vector remove failed: {}", e)))?;
        let mut kw = self.keyword_lock()?;
        kw.delete(id)
            .and_then(|_| kw.commit())
            .map_err(|e| MemoraError::Index(format!("Keyword remove failed: {}", e)))?;
        Ok(())
    }

    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.provider
            .embed(text)
            .map_err(|e| MemoraError::Index(format!("Query embedding failed: {}", e)))
    }

    pub fn vector_index(&self) -> &VectorIndex {
        &self.vector_index
    }

    pub fn keyword_search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KeywordSearchResult>> {
        let kw = self.keyword_lock()?;
        kw.search(user_id, query, limit)
            .map_err(|e| MemoraError::Index(format!("Keyword search failed: {}", e)))
    }

    fn keyword_lock(&self) -> Result<std::sync::MutexGuard<'_, KeywordIndex>> {
        self.keyword_index
            .lock()
            .map_err(|e| MemoraError::Index(format!("Keyword index lock poisoned: {}", e)))
    }

    fn with_retries<F>(&self, mut op: F) -> Result<()>
    where
        F: FnMut() -> Result<()>,
    {
        let mut last_err = None;
        for attempt in 1..=self.retries {
            match op() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, "Index upsert attempt failed: {}", e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| MemoraError::Index("Upsert failed".to_string())))
    }
}
