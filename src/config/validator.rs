use crate::config::Config;
use crate::error::{MemoraError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_ingest(config, &mut errors);
        Self::validate_guardrails(config, &mut errors);
        Self::validate_dedup(config, &mut errors);
        Self::validate_merge(config, &mut errors);
        Self::validate_episode(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MemoraError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
    }

    fn validate_ingest(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.ingest.workers == 0 {
            errors.push(ValidationError::new(
                "ingest.workers",
                "Worker count must be greater than 0",
            ));
        }
        if config.ingest.queue_size == 0 {
            errors.push(ValidationError::new(
                "ingest.queue_size",
                "Queue size must be greater than 0",
            ));
        }
    }

    fn validate_guardrails(config: &Config, errors: &mut Vec<ValidationError>) {
        let g = &config.guardrails;
        if g.max_media_bytes == 0 {
            errors.push(ValidationError::new(
                "guardrails.max_media_bytes",
                "Max media size must be greater than 0",
            ));
        }
        if g.chunk_target_bytes == 0 || g.chunk_target_bytes > g.max_media_bytes {
            errors.push(ValidationError::new(
                "guardrails.chunk_target_bytes",
                "Chunk byte budget must be positive and not exceed max_media_bytes",
            ));
        }
        if g.chunk_max_duration_secs == 0 {
            errors.push(ValidationError::new(
                "guardrails.chunk_max_duration_secs",
                "Chunk duration cap must be greater than 0",
            ));
        }
        if g.max_chunks == 0 {
            errors.push(ValidationError::new(
                "guardrails.max_chunks",
                "Chunk count cap must be greater than 0",
            ));
        }
    }

    fn validate_dedup(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.dedup.phash_hamming_threshold > 64 {
            errors.push(ValidationError::new(
                "dedup.phash_hamming_threshold",
                "Hamming threshold cannot exceed 64 bits",
            ));
        }
    }

    fn validate_merge(config: &Config, errors: &mut Vec<ValidationError>) {
        let t = config.merge.similarity_threshold;
        if !(0.0..=1.0).contains(&t) {
            errors.push(ValidationError::new(
                "merge.similarity_threshold",
                format!("Similarity threshold must be in [0, 1], got {}", t),
            ));
        }
    }

    fn validate_episode(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.episode.max_gap_secs <= 0 {
            errors.push(ValidationError::new(
                "episode.max_gap_secs",
                "Episode max gap must be positive",
            ));
        }
        if config.episode.candidate_limit == 0 {
            errors.push(ValidationError::new(
                "episode.candidate_limit",
                "Candidate limit must be greater than 0",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexing.vector_dim == 0 {
            errors.push(ValidationError::new(
                "indexing.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }
        if config.indexing.hnsw_m == 0 || config.indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW parameters must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let r = &config.retrieval;
        if r.search_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.search_multiplier",
                "Search multiplier must be greater than 0",
            ));
        }
        if r.semantic_weight <= 0.0 || r.keyword_weight <= 0.0 {
            errors.push(ValidationError::new(
                "retrieval.semantic_weight",
                "Fusion weights must be positive",
            ));
        }
        if r.max_evidence == 0 {
            errors.push(ValidationError::new(
                "retrieval.max_evidence",
                "Evidence set size must be greater than 0",
            ));
        }
        if !(0.0..=1.0).contains(&r.daily_summary_penalty) {
            errors.push(ValidationError::new(
                "retrieval.daily_summary_penalty",
                "Daily summary penalty must be in [0, 1]",
            ));
        }
        if r.episode_boost < 1.0 {
            errors.push(ValidationError::new(
                "retrieval.episode_boost",
                "Episode boost must be >= 1.0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default() {
        assert!(ConfigValidator::validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_invalid_merge_threshold() {
        let mut config = Config::default();
        config.merge.similarity_threshold = 1.5;
        let result = ConfigValidator::validate(&config);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_workers() {
        let mut config = Config::default();
        config.ingest.workers = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_multiple_errors() {
        let mut config = Config::default();
        config.ingest.workers = 0;
        config.merge.similarity_threshold = -0.2;
        config.episode.max_gap_secs = 0;

        match ConfigValidator::validate(&config) {
            Err(MemoraError::ConfigValidation { errors }) => {
                assert!(errors.len() >= 3);
            }
            other => panic!("Expected validation failure, got {:?}", other.err()),
        }
    }
}
