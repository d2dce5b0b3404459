//! Ingestion front door and background processing workers
//!
//! `ingest` stores the raw media, inserts a pending item, and enqueues it on a
//! bounded channel. A pool of workers drains the queue, runs the pipeline,
//! writes both indexes, and folds new contexts into episodes and daily
//! summaries. Exact re-uploads are answered synchronously without re-storing.

use crate::config::Config;
use crate::embedding::ContextIndexer;
use crate::episode::{day_key, DailySummaryBuilder, EpisodeClusterer};
use crate::error::{MemoraError, Result};
use crate::pipeline::extract::{ContextModel, MediaProbe};
use crate::pipeline::PipelineRunner;
use crate::storage::models::{ItemStatus, ItemType, SourceItem};
use crate::storage::StorageManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// One media upload
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub user_id: String,
    pub content_type: String,
    pub filename: Option<String>,
    pub data: Vec<u8>,
    /// Client-supplied capture time (UTC seconds), possibly timezone-naive
    pub captured_at: Option<i64>,
    pub tz_offset_minutes: Option<i32>,
    /// Capture time reported by a sync provider/connector
    pub provider_captured_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum IngestStatus {
    /// Accepted and queued for background processing
    Queued,
    /// Byte-identical to an item this user already uploaded
    Duplicate { canonical_item_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub item_id: String,
    /// Processing task handle; absent for duplicates, which enqueue nothing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(flatten)]
    pub status: IngestStatus,
}

/// Map a MIME type onto a supported item type
pub fn item_type_for(content_type: &str) -> Option<ItemType> {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    if mime.starts_with("image/") {
        Some(ItemType::Photo)
    } else if mime.starts_with("video/") {
        Some(ItemType::Video)
    } else if mime.starts_with("audio/") {
        Some(ItemType::Audio)
    } else {
        None
    }
}

/// Everything one worker needs to take an item from pending to completed
struct ItemProcessor {
    storage: Arc<StorageManager>,
    runner: PipelineRunner,
    indexer: Arc<ContextIndexer>,
    clusterer: EpisodeClusterer,
    daily: DailySummaryBuilder,
}

impl ItemProcessor {
    fn process(&self, item_id: &str) -> Result<()> {
        let report = self.runner.run_item(item_id)?;
        if report.failed {
            // The runner already marked the item failed
            return Ok(());
        }

        let db = &self.storage.database;
        if let Some(canonical) = &report.duplicate_of {
            tracing::info!(item_id, canonical, "Duplicate item, reusing canonical contexts");
            db.set_item_status(item_id, ItemStatus::Completed)?;
            return Ok(());
        }

        // Index failures degrade the item rather than failing it: the
        // relational rows are the source of truth and a rebuild recovers
        let mut degraded = false;
        if let Err(e) = self.indexer.index_contexts(&report.contexts) {
            tracing::warn!(item_id, "Index write failed: {}", e);
            degraded = true;
        }

        if let Some(user_id) = report.contexts.first().map(|c| c.user_id.clone()) {
            match self.clusterer.cluster_item(&report.contexts) {
                Ok(Some(episode)) => {
                    let day = day_key(episode.window.start);
                    if let Err(e) = self.daily.rebuild(&user_id, &day) {
                        tracing::warn!(item_id, day, "Daily summary rebuild failed: {}", e);
                        degraded = true;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(item_id, "Episode clustering failed: {}", e);
                    degraded = true;
                }
            }
        }

        let status = if degraded {
            ItemStatus::Degraded
        } else {
            ItemStatus::Completed
        };
        db.set_item_status(item_id, status)?;
        Ok(())
    }
}

/// Accepts uploads and owns the background worker pool
pub struct Ingestor {
    storage: Arc<StorageManager>,
    indexer: Arc<ContextIndexer>,
    tx: mpsc::Sender<String>,
    workers: Vec<JoinHandle<()>>,
}

impl Ingestor {
    /// Spawn the worker pool. Must be called from within a tokio runtime.
    pub fn new(
        storage: Arc<StorageManager>,
        config: &Config,
        probe: Arc<dyn MediaProbe>,
        model: Arc<dyn ContextModel>,
        indexer: Arc<ContextIndexer>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<String>(config.ingest.queue_size.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let processor = Arc::new(ItemProcessor {
            storage: storage.clone(),
            runner: PipelineRunner::new(storage.clone(), config.clone(), probe, model.clone()),
            indexer: indexer.clone(),
            clusterer: EpisodeClusterer::new(
                storage.clone(),
                indexer.clone(),
                model.clone(),
                config.episode.clone(),
                config.merge.clone(),
            ),
            daily: DailySummaryBuilder::new(storage.clone(), indexer.clone(), model),
        });

        let workers = (0..config.ingest.workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let processor = processor.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the lock only for the recv itself
                        let next = { rx.lock().await.recv().await };
                        let Some(item_id) = next else { break };

                        let task_processor = processor.clone();
                        let task_item = item_id.clone();
                        match tokio::task::spawn_blocking(move || task_processor.process(&task_item))
                            .await
                        {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                tracing::error!(worker, item_id, "Item processing failed: {}", e)
                            }
                            Err(e) => {
                                tracing::error!(worker, item_id, "Item processing panicked: {}", e)
                            }
                        }
                    }
                    tracing::debug!(worker, "Ingest worker stopped");
                })
            })
            .collect();

        Self {
            storage,
            indexer,
            tx,
            workers,
        }
    }

    /// Accept one upload.
    ///
    /// A byte-identical re-upload by the same user returns the existing item
    /// id without storing or enqueueing anything.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse> {
        let item_type = item_type_for(&request.content_type).ok_or_else(|| {
            MemoraError::MediaRejected(format!(
                "Unsupported content type: {}",
                request.content_type
            ))
        })?;
        if request.data.is_empty() {
            return Err(MemoraError::MediaRejected("Empty media payload".to_string()));
        }

        let content_hash = blake3::hash(&request.data).to_hex().to_string();
        let db = &self.storage.database;

        if let Some(existing) = db.find_item_by_content_hash(&request.user_id, &content_hash)? {
            tracing::debug!(
                user_id = %request.user_id,
                item_id = %existing,
                "Exact re-upload, returning existing item"
            );
            return Ok(IngestResponse {
                item_id: existing.clone(),
                task_id: None,
                status: IngestStatus::Duplicate {
                    canonical_item_id: existing,
                },
            });
        }

        let (storage_ref, _) = self.storage.media_store.write(&request.data)?;
        let now = chrono::Utc::now().timestamp();
        let item = SourceItem {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: request.user_id,
            item_type,
            storage_ref,
            content_type: request.content_type,
            filename: request.filename,
            content_hash,
            perceptual_hash: None,
            captured_at: request.captured_at,
            tz_offset_minutes: request.tz_offset_minutes,
            provider_captured_at: request.provider_captured_at,
            received_at: now,
            event_time: None,
            event_time_source: None,
            event_time_confidence: None,
            status: ItemStatus::Pending,
            canonical_item_id: None,
            created_at: now,
        };
        db.insert_item(&item)?;

        self.tx
            .send(item.id.clone())
            .await
            .map_err(|_| MemoraError::Ingest("Ingest queue is closed".to_string()))?;

        let task_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(item_id = %item.id, task_id = %task_id, item_type = item_type.as_str(), "Item queued");
        Ok(IngestResponse {
            item_id: item.id,
            task_id: Some(task_id),
            status: IngestStatus::Queued,
        })
    }

    /// Delete an item and every context it solely supports
    pub fn delete_item(&self, item_id: &str) -> Result<Vec<String>> {
        let removed = self.storage.database.delete_item(item_id)?;
        for context_id in &removed {
            if let Err(e) = self.indexer.remove_context(context_id) {
                tracing::warn!(context_id, "Index removal failed: {}", e);
            }
        }
        tracing::info!(item_id, removed = removed.len(), "Item deleted");
        Ok(removed)
    }

    /// Close the queue and wait for workers to drain it
    pub async fn shutdown(self) {
        let Ingestor { tx, workers, .. } = self;
        drop(tx);
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!("Ingest worker join failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::provider::{EmbeddingError, EmbeddingProvider};
    use crate::pipeline::extract::{
        EpisodeSummary, ExtractError, ExtractOutput, ExtractRequest, MediaMetadata,
        SummarizeRequest,
    };
    use crate::taxonomy::{ContextType, Entity, ExtractedContext};
    use tempfile::TempDir;

    struct StubProbe {
        captured_at: Option<i64>,
    }

    impl MediaProbe for StubProbe {
        fn probe(
            &self,
            _data: &[u8],
            _item_type: ItemType,
        ) -> std::result::Result<MediaMetadata, ExtractError> {
            Ok(MediaMetadata {
                captured_at: self.captured_at,
                perceptual_hash: Some(0x0f0f),
                ..Default::default()
            })
        }
    }

    struct StubModel;

    impl ContextModel for StubModel {
        fn extract(
            &self,
            request: &ExtractRequest,
        ) -> std::result::Result<ExtractOutput, ExtractError> {
            Ok(ExtractOutput {
                transcript: None,
                contexts: vec![ExtractedContext {
                    context_type: ContextType::Activity,
                    title: format!("Moment from {}", request.item.id),
                    summary: "A captured moment".to_string(),
                    keywords: vec!["moment".to_string()],
                    entities: vec![Entity::new("person", "Alice", 0.9)],
                    location: None,
                    confidence: 0.8,
                    importance: 0.5,
                }],
            })
        }

        fn summarize_episode(
            &self,
            _request: &SummarizeRequest,
        ) -> std::result::Result<EpisodeSummary, ExtractError> {
            Ok(EpisodeSummary {
                title: "An outing".to_string(),
                summary: "Things happened".to_string(),
            })
        }
    }

    struct HashEmbedder;

    impl EmbeddingProvider for HashEmbedder {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            let mut v = vec![0.0f32; 16];
            for token in text.split_whitespace() {
                let h = blake3::hash(token.as_bytes());
                v[(h.as_bytes()[0] as usize) % 16] += 1.0;
            }
            Ok(v)
        }

        fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            16
        }

        fn model_name(&self) -> &str {
            "hash-embedder"
        }
    }

    fn ingestor(temp: &TempDir, captured_at: Option<i64>) -> Ingestor {
        let mut config = Config::default();
        config.ingest.workers = 1;
        let storage = Arc::new(StorageManager::new(temp.path().to_path_buf(), 4096).unwrap());
        let indexer = Arc::new(
            ContextIndexer::new(
                Arc::new(HashEmbedder),
                &config.indexing,
                storage.keywords_dir(),
            )
            .unwrap(),
        );
        Ingestor::new(
            storage,
            &config,
            Arc::new(StubProbe { captured_at }),
            Arc::new(StubModel),
            indexer,
        )
    }

    fn photo(user: &str, data: &[u8]) -> IngestRequest {
        IngestRequest {
            user_id: user.to_string(),
            content_type: "image/jpeg".to_string(),
            filename: Some("photo.jpg".to_string()),
            data: data.to_vec(),
            captured_at: None,
            tz_offset_minutes: None,
            provider_captured_at: None,
        }
    }

    #[tokio::test]
    async fn test_ingest_processes_to_completion() {
        let temp = TempDir::new().unwrap();
        let captured = 1_770_000_000;
        let ingestor = ingestor(&temp, Some(captured));

        let response = ingestor.ingest(photo("u1", b"jpeg bytes")).await.unwrap();
        assert_eq!(response.status, IngestStatus::Queued);
        assert!(response.task_id.is_some());

        let storage = ingestor.storage.clone();
        let item_id = response.item_id.clone();
        ingestor.shutdown().await;

        let item = storage.database.get_item(&item_id).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.event_time, Some(captured));

        let contexts = storage.database.contexts_for_item(&item_id).unwrap();
        assert!(!contexts.is_empty());
        // Clustering produced an episode, which produced a daily summary
        let day = day_key(captured);
        assert!(storage.database.daily_summary("u1", &day).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_exact_reupload_returns_existing_item() {
        let temp = TempDir::new().unwrap();
        let ingestor = ingestor(&temp, Some(1_770_000_000));

        let first = ingestor.ingest(photo("u1", b"same bytes")).await.unwrap();
        let second = ingestor.ingest(photo("u1", b"same bytes")).await.unwrap();

        assert_eq!(second.item_id, first.item_id);
        assert!(second.task_id.is_none());
        assert_eq!(
            second.status,
            IngestStatus::Duplicate {
                canonical_item_id: first.item_id.clone()
            }
        );
        ingestor.shutdown().await;
    }

    #[tokio::test]
    async fn test_same_bytes_different_user_is_not_duplicate() {
        let temp = TempDir::new().unwrap();
        let ingestor = ingestor(&temp, Some(1_770_000_000));

        let first = ingestor.ingest(photo("u1", b"shared bytes")).await.unwrap();
        let second = ingestor.ingest(photo("u2", b"shared bytes")).await.unwrap();

        assert_ne!(second.item_id, first.item_id);
        assert_eq!(second.status, IngestStatus::Queued);
        ingestor.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsupported_content_type_rejected() {
        let temp = TempDir::new().unwrap();
        let ingestor = ingestor(&temp, None);

        let mut request = photo("u1", b"plain text");
        request.content_type = "text/plain".to_string();
        let result = ingestor.ingest(request).await;
        assert!(matches!(result, Err(MemoraError::MediaRejected(_))));
        ingestor.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_item_clears_contexts() {
        let temp = TempDir::new().unwrap();
        let ingestor = ingestor(&temp, Some(1_770_000_000));

        let response = ingestor.ingest(photo("u1", b"to delete")).await.unwrap();
        let storage = ingestor.storage.clone();
        let indexer = ingestor.indexer.clone();
        let item_id = response.item_id.clone();

        // Drain the queue so the item is fully processed before deleting
        let (probe, model) = (
            Arc::new(StubProbe {
                captured_at: Some(1_770_000_000),
            }),
            Arc::new(StubModel),
        );
        let mut config = Config::default();
        config.ingest.workers = 1;
        ingestor.shutdown().await;

        let reopened = Ingestor::new(storage.clone(), &config, probe, model, indexer);
        let removed = reopened.delete_item(&item_id).unwrap();
        assert!(!removed.is_empty());
        assert!(storage
            .database
            .contexts_for_item(&item_id)
            .unwrap()
            .is_empty());
        reopened.shutdown().await;
    }

    #[test]
    fn test_item_type_mapping() {
        assert_eq!(item_type_for("image/png"), Some(ItemType::Photo));
        assert_eq!(item_type_for("video/mp4; codecs=avc1"), Some(ItemType::Video));
        assert_eq!(item_type_for("audio/mpeg"), Some(ItemType::Audio));
        assert_eq!(item_type_for("application/pdf"), None);
    }
}
