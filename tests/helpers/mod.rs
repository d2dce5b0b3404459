//! Shared collaborator stubs for integration tests
#![allow(dead_code)]

use memora::config::Config;
use memora::embedding::provider::{EmbeddingError, EmbeddingProvider};
use memora::embedding::ContextIndexer;
use memora::ingest::IngestRequest;
use memora::pipeline::extract::{
    ContextModel, EpisodeSummary, ExtractError, ExtractOutput, ExtractRequest, MediaMetadata,
    MediaProbe, SummarizeRequest,
};
use memora::storage::models::ItemType;
use memora::storage::StorageManager;
use memora::taxonomy::{ContextType, Entity, ExtractedContext};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Deterministic embedder: hashes lowercased tokens into a fixed-size vector
pub struct HashEmbedder;

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = vec![0.0f32; 64];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = blake3::hash(token.to_lowercase().as_bytes());
            v[(h.as_bytes()[0] as usize) % 64] += 1.0;
        }
        Ok(v)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        64
    }

    fn model_name(&self) -> &str {
        "hash-embedder"
    }
}

/// Probe that derives the perceptual hash from the first media byte and pops
/// capture times from a queue (FIFO, matching single-worker processing order)
pub struct StubProbe {
    pub capture_times: Mutex<VecDeque<i64>>,
}

impl StubProbe {
    pub fn new(capture_times: Vec<i64>) -> Self {
        Self {
            capture_times: Mutex::new(capture_times.into()),
        }
    }
}

impl MediaProbe for StubProbe {
    fn probe(&self, data: &[u8], _item_type: ItemType) -> Result<MediaMetadata, ExtractError> {
        let captured_at = self.capture_times.lock().unwrap().pop_front();
        Ok(MediaMetadata {
            captured_at,
            perceptual_hash: data.first().map(|b| *b as i64),
            ..Default::default()
        })
    }
}

/// Model that titles each context after the item's filename
pub struct StubModel;

impl ContextModel for StubModel {
    fn extract(&self, request: &ExtractRequest) -> Result<ExtractOutput, ExtractError> {
        let title = request
            .item
            .filename
            .clone()
            .unwrap_or_else(|| "Captured moment".to_string());
        let keywords: Vec<String> = title
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();
        Ok(ExtractOutput {
            transcript: None,
            contexts: vec![ExtractedContext {
                context_type: ContextType::Activity,
                title: title.clone(),
                summary: format!("{} captured by the user", title),
                keywords,
                entities: vec![Entity::new("person", "Alice", 0.9)],
                location: None,
                confidence: 0.8,
                importance: 0.5,
            }],
        })
    }

    fn summarize_episode(
        &self,
        request: &SummarizeRequest,
    ) -> Result<EpisodeSummary, ExtractError> {
        Ok(EpisodeSummary {
            title: format!("Episode of {} moments", request.lines.len()),
            summary: request.lines.join(" / "),
        })
    }
}

pub fn storage(base: &Path) -> Arc<StorageManager> {
    Arc::new(StorageManager::new(base.to_path_buf(), 4096).unwrap())
}

pub fn indexer(storage: &Arc<StorageManager>, config: &Config) -> Arc<ContextIndexer> {
    Arc::new(
        ContextIndexer::new(
            Arc::new(HashEmbedder),
            &config.indexing,
            storage.keywords_dir(),
        )
        .unwrap(),
    )
}

pub fn photo(user: &str, filename: &str, data: &[u8]) -> IngestRequest {
    IngestRequest {
        user_id: user.to_string(),
        content_type: "image/jpeg".to_string(),
        filename: Some(filename.to_string()),
        data: data.to_vec(),
        captured_at: None,
        tz_offset_minutes: None,
        provider_captured_at: None,
    }
}
