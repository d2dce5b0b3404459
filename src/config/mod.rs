//! Configuration management for memora
//!
//! Guardrails are externally supplied configuration, not internal state: media
//! size/duration caps, chunking budgets, merge and episode thresholds all live
//! here and are validated on load.

use crate::error::{MemoraError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta", default)]
    pub meta: MetaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub guardrails: GuardrailConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub episode: EpisodeConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: "1.0.0".to_string(),
            created_at: current_timestamp(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Compress stored text artifacts (transcripts) above this many bytes
    pub compress_threshold: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.local/share/memora"),
            compress_threshold: 4096,
        }
    }
}

/// Ingestion worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Number of concurrent background workers
    pub workers: usize,
    /// Bounded queue size for pending items
    pub queue_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 256,
        }
    }
}

/// Media guardrails applied before extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Reject items larger than this many bytes
    pub max_media_bytes: u64,
    /// Reject video/audio longer than this many seconds
    pub max_duration_secs: u64,
    /// Target byte budget per extraction chunk
    pub chunk_target_bytes: u64,
    /// Hard cap on a single chunk's duration
    pub chunk_max_duration_secs: u64,
    /// Hard cap on chunk count per item; chunks beyond this are skipped
    pub max_chunks: usize,
    /// Transcripts above this many bytes go to the media store instead of inline artifact payloads
    pub transcript_inline_threshold: usize,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_media_bytes: 512 * 1024 * 1024,
            max_duration_secs: 2 * 60 * 60,
            chunk_target_bytes: 16 * 1024 * 1024,
            chunk_max_duration_secs: 120,
            max_chunks: 32,
            transcript_inline_threshold: 16 * 1024,
        }
    }
}

/// Duplicate detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Perceptual hash Hamming distance below which an image is a near-duplicate
    pub phash_hamming_threshold: u32,
    /// How many recent items to compare perceptual hashes against
    pub phash_window: usize,
    /// Whether duplicates still run the full (expensive) pipeline
    pub process_duplicates: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            phash_hamming_threshold: 6,
            phash_window: 200,
            process_duplicates: false,
        }
    }
}

/// Intra-item semantic merge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Jaccard similarity at or above which same-type contexts merge
    pub similarity_threshold: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
        }
    }
}

/// Episode clustering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeConfig {
    /// Maximum time gap (seconds) between an item and an episode it may join
    pub max_gap_secs: i64,
    /// Candidate episodes to consider per clustering pass
    pub candidate_limit: usize,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            max_gap_secs: 90 * 60,
            candidate_limit: 16,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            batch_size: 32,
        }
    }
}

/// Vector/keyword indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub vector_dim: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
    /// Retries for the paired relational + index upsert before marking an item degraded
    pub upsert_retries: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            vector_dim: 384,
            hnsw_ef_construction: 200,
            hnsw_m: 16,
            upsert_retries: 3,
        }
    }
}

/// Retrieval and ranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Over-fetch multiplier applied to the requested limit before fusion
    pub search_multiplier: usize,
    pub rrf_k: f32,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    pub hnsw_ef_search: usize,
    /// Additive boost per query entity matched by a candidate
    pub entity_boost: f32,
    /// Multiplicative boost for episode contexts on broad query shapes
    pub episode_boost: f32,
    /// Multiplicative penalty applied to daily summaries so they do not crowd out episodes
    pub daily_summary_penalty: f32,
    /// Half-life in days for recency decay
    pub recency_half_life_days: f32,
    /// Rerank top-N fused candidates for fact/summary shapes
    pub enable_reranking: bool,
    pub rerank_candidates_limit: usize,
    /// Final evidence set size handed to response generation
    pub max_evidence: usize,
    /// Overall retrieval timeout; partial evidence is returned on expiry
    pub search_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_multiplier: 4,
            rrf_k: 60.0,
            semantic_weight: 1.0,
            keyword_weight: 0.7,
            hnsw_ef_search: 64,
            entity_boost: 0.05,
            episode_boost: 1.3,
            daily_summary_penalty: 0.6,
            recency_half_life_days: 90.0,
            enable_reranking: false,
            rerank_candidates_limit: 24,
            max_evidence: 8,
            search_timeout_ms: 5000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig::default(),
            storage: StorageConfig::default(),
            ingest: IngestConfig::default(),
            guardrails: GuardrailConfig::default(),
            dedup: DedupConfig::default(),
            merge: MergeConfig::default(),
            episode: EpisodeConfig::default(),
            embedding: EmbeddingConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MemoraError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| MemoraError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let config: Config = toml::from_str(&content)?;

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| MemoraError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Default config file path (~/.config/memora/config.toml)
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| MemoraError::Config("Cannot determine config directory".to_string()))?;
        Ok(config_dir.join("memora").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let config = Config::default();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.merge.similarity_threshold, 0.6);
        assert_eq!(loaded.episode.max_gap_secs, 90 * 60);
        assert_eq!(loaded.retrieval.max_evidence, 8);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/memora.toml"));
        assert!(matches!(result, Err(MemoraError::ConfigNotFound { .. })));
    }
}
