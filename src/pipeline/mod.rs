//! The versioned extraction pipeline
//!
//! Each step records a DerivedArtifact under the (item, kind, producer,
//! producer_version, fingerprint) idempotency key. Rerunning an item with
//! unchanged inputs and versions reuses cached artifacts and writes nothing
//! new; bumping a step version reprocesses that step and everything after it.

pub mod chunk;
pub mod dedup;
pub mod event_time;
pub mod extract;
pub mod fingerprint;
pub mod merge;

use crate::config::Config;
use crate::error::{MemoraError, Result};
use crate::storage::models::{ContextRecord, ItemStatus, ItemType, SourceItem, StepStatus};
use crate::storage::StorageManager;
use crate::taxonomy::{ContextType, TimeWindow};
use chunk::{ChunkPlan, ChunkStatus};
use extract::{ContextModel, ExtractionResult, MediaMetadata, MediaProbe};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// One pipeline step's identity and invalidation version
#[derive(Debug, Clone, Copy)]
pub struct StepDescriptor {
    pub name: &'static str,
    pub version: u32,
    /// Required steps fail the item when they fail; others degrade gracefully
    pub required: bool,
}

pub const STEP_METADATA: StepDescriptor = StepDescriptor {
    name: "metadata",
    version: 1,
    required: true,
};
pub const STEP_EVENT_TIME: StepDescriptor = StepDescriptor {
    name: "event_time",
    version: 1,
    required: true,
};
pub const STEP_DEDUP: StepDescriptor = StepDescriptor {
    name: "dedup",
    version: 1,
    required: false,
};
pub const STEP_CHUNK: StepDescriptor = StepDescriptor {
    name: "chunk",
    version: 1,
    required: false,
};
pub const STEP_EXTRACT: StepDescriptor = StepDescriptor {
    name: "extract",
    version: 1,
    required: false,
};
pub const STEP_MERGE: StepDescriptor = StepDescriptor {
    name: "merge",
    version: 1,
    required: true,
};

/// All steps in execution order
pub const STEPS: &[StepDescriptor] = &[
    STEP_METADATA,
    STEP_EVENT_TIME,
    STEP_DEDUP,
    STEP_CHUNK,
    STEP_EXTRACT,
    STEP_MERGE,
];

/// Per-step outcome in a pipeline report
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: &'static str,
    pub status: StepStatus,
    /// True when a cached artifact satisfied the step
    pub cached: bool,
}

/// Result of running the pipeline over one item
#[derive(Debug)]
pub struct PipelineReport {
    pub item_id: String,
    pub outcomes: Vec<StepOutcome>,
    /// Contexts persisted (or re-read from cache) by the merge step
    pub contexts: Vec<ContextRecord>,
    pub duplicate_of: Option<String>,
    /// Set only when a required step failed (unreadable or rejected media)
    pub failed: bool,
}

impl PipelineReport {
    fn new(item_id: String) -> Self {
        Self {
            item_id,
            outcomes: Vec::new(),
            contexts: Vec::new(),
            duplicate_of: None,
            failed: false,
        }
    }

    fn record(&mut self, step: &StepDescriptor, status: StepStatus, cached: bool) {
        self.outcomes.push(StepOutcome {
            step: step.name,
            status,
            cached,
        });
    }
}

/// Extract step artifact payload
#[derive(Debug, Serialize, Deserialize, Default)]
struct ExtractArtifact {
    contexts: Vec<(Option<usize>, crate::taxonomy::ExtractedContext)>,
    /// Inline transcript when small enough
    transcript: Option<String>,
    /// Media-store ref when the transcript exceeds the inline threshold
    transcript_ref: Option<String>,
    chunk_statuses: Vec<ChunkStatus>,
    had_errors: bool,
}

/// Merge step artifact payload
#[derive(Debug, Serialize, Deserialize)]
struct MergeArtifact {
    context_ids: Vec<String>,
}

/// Runs the step chain for one item at a time
pub struct PipelineRunner {
    storage: Arc<StorageManager>,
    config: Config,
    probe: Arc<dyn MediaProbe>,
    model: Arc<dyn ContextModel>,
}

impl PipelineRunner {
    pub fn new(
        storage: Arc<StorageManager>,
        config: Config,
        probe: Arc<dyn MediaProbe>,
        model: Arc<dyn ContextModel>,
    ) -> Self {
        Self {
            storage,
            config,
            probe,
            model,
        }
    }

    /// Run (or re-run) the full pipeline for an item.
    ///
    /// Safe to call repeatedly: every step consults its artifact cache first,
    /// so an unchanged item produces zero new rows.
    pub fn run_item(&self, item_id: &str) -> Result<PipelineReport> {
        let db = &self.storage.database;
        let item = db
            .get_item(item_id)?
            .ok_or_else(|| MemoraError::ItemNotFound {
                id: item_id.to_string(),
            })?;

        db.set_item_status(&item.id, ItemStatus::Processing)?;
        let mut report = PipelineReport::new(item.id.clone());

        let media = self.storage.media_store.read(&item.storage_ref)?;

        // -- metadata: probe the raw bytes --
        let metadata = match self.step_metadata(&item, &media, &mut report)? {
            Some(metadata) => metadata,
            None => {
                db.set_item_status(&item.id, ItemStatus::Failed)?;
                report.failed = true;
                return Ok(report);
            }
        };

        // Re-read: the metadata step may have backfilled the perceptual hash
        let item = db
            .get_item(item_id)?
            .ok_or_else(|| MemoraError::ItemNotFound {
                id: item_id.to_string(),
            })?;

        // -- event time: resolve the canonical timestamp --
        let event_time = self.step_event_time(&item, &metadata, &mut report)?;

        // -- dedup gate --
        let outcome = self.step_dedup(&item, &mut report)?;
        if outcome.is_duplicate() && !self.config.dedup.process_duplicates {
            report.duplicate_of = outcome.duplicate_of.clone();
            // Contexts already exist on the canonical item; record the skip
            self.record_artifact(
                &item,
                &STEP_EXTRACT,
                &self.extract_fingerprint(&item, None),
                StepStatus::Duplicate,
                None,
                None,
            )?;
            report.record(&STEP_EXTRACT, StepStatus::Duplicate, false);
            return Ok(report);
        }

        // -- guardrails: rejected items never reach extraction --
        if let Err(reason) =
            extract::check_guardrails(&self.config.guardrails, media.len() as u64, &metadata)
        {
            tracing::warn!(item_id = %item.id, reason = %reason, "Guardrail rejection, failing item");
            self.record_artifact(
                &item,
                &STEP_EXTRACT,
                &self.extract_fingerprint(&item, None),
                StepStatus::Skipped,
                None,
                Some(reason.as_str()),
            )?;
            report.record(&STEP_EXTRACT, StepStatus::Skipped, false);
            db.set_item_status(&item.id, ItemStatus::Failed)?;
            report.failed = true;
            return Ok(report);
        }

        // -- chunk planning (video/audio) --
        let plan = self.step_chunk(&item, &metadata, media.len() as u64, &mut report)?;

        // -- extract --
        let extracted = self.step_extract(&item, &media, &metadata, plan.as_ref(), &mut report)?;

        // -- merge and persist --
        let extract_fp = self.extract_fingerprint(&item, plan.as_ref());
        let contexts =
            self.step_merge(&item, &metadata, event_time, &extract_fp, &extracted, &mut report)?;
        report.contexts = contexts;

        Ok(report)
    }

    fn step_metadata(
        &self,
        item: &SourceItem,
        media: &[u8],
        report: &mut PipelineReport,
    ) -> Result<Option<MediaMetadata>> {
        let fp = fingerprint::fingerprint(
            STEP_METADATA.name,
            STEP_METADATA.version,
            &json!({ "content_hash": item.content_hash }),
        );

        if let Some(artifact) = self.find_artifact(item, &STEP_METADATA, &fp)? {
            if artifact.status == StepStatus::Error {
                report.record(&STEP_METADATA, StepStatus::Error, true);
                return Ok(None);
            }
            if let Some(payload) = artifact.payload {
                let metadata: MediaMetadata =
                    serde_json::from_value(payload).map_err(|e| MemoraError::Json {
                        source: e,
                        context: "Failed to decode cached metadata artifact".to_string(),
                    })?;
                report.record(&STEP_METADATA, StepStatus::Ok, true);
                return Ok(Some(metadata));
            }
        }

        match self.probe.probe(media, item.item_type) {
            Ok(metadata) => {
                if let Some(phash) = metadata.perceptual_hash {
                    self.storage
                        .database
                        .set_item_perceptual_hash(&item.id, phash)?;
                }
                let payload = serde_json::to_value(&metadata).map_err(|e| MemoraError::Json {
                    source: e,
                    context: "Failed to serialize metadata artifact".to_string(),
                })?;
                self.record_artifact(item, &STEP_METADATA, &fp, StepStatus::Ok, Some(&payload), None)?;
                report.record(&STEP_METADATA, StepStatus::Ok, false);
                Ok(Some(metadata))
            }
            Err(e) => {
                tracing::error!(item_id = %item.id, "Media probe failed: {}", e);
                self.record_artifact(
                    item,
                    &STEP_METADATA,
                    &fp,
                    StepStatus::Error,
                    None,
                    Some(&e.to_string()),
                )?;
                report.record(&STEP_METADATA, StepStatus::Error, false);
                Ok(None)
            }
        }
    }

    fn step_event_time(
        &self,
        item: &SourceItem,
        metadata: &MediaMetadata,
        report: &mut PipelineReport,
    ) -> Result<i64> {
        let inputs = json!({
            "media_captured_at": metadata.captured_at,
            "provider_captured_at": item.provider_captured_at,
            "captured_at": item.captured_at,
            "tz_offset_minutes": item.tz_offset_minutes,
            "received_at": item.received_at,
        });
        let fp = fingerprint::fingerprint(STEP_EVENT_TIME.name, STEP_EVENT_TIME.version, &inputs);

        if let Some(artifact) = self.find_artifact(item, &STEP_EVENT_TIME, &fp)? {
            if let Some(payload) = &artifact.payload {
                if let Some(ts) = payload.get("event_time").and_then(Value::as_i64) {
                    report.record(&STEP_EVENT_TIME, StepStatus::Ok, true);
                    return Ok(ts);
                }
            }
        }

        let resolved = event_time::resolve_event_time(item, metadata);
        self.storage.database.set_item_event_time(
            &item.id,
            resolved.event_time,
            resolved.source,
            resolved.confidence,
        )?;

        let payload = json!({
            "event_time": resolved.event_time,
            "source": resolved.source.as_str(),
            "confidence": resolved.confidence,
        });
        self.record_artifact(item, &STEP_EVENT_TIME, &fp, StepStatus::Ok, Some(&payload), None)?;
        report.record(&STEP_EVENT_TIME, StepStatus::Ok, false);
        Ok(resolved.event_time)
    }

    fn step_dedup(
        &self,
        item: &SourceItem,
        report: &mut PipelineReport,
    ) -> Result<dedup::DedupOutcome> {
        let inputs = json!({
            "content_hash": item.content_hash,
            "perceptual_hash": item.perceptual_hash,
            "threshold": self.config.dedup.phash_hamming_threshold,
            "window": self.config.dedup.phash_window,
        });
        let fp = fingerprint::fingerprint(STEP_DEDUP.name, STEP_DEDUP.version, &inputs);

        if let Some(artifact) = self.find_artifact(item, &STEP_DEDUP, &fp)? {
            if let Some(payload) = artifact.payload {
                if let Ok(outcome) = serde_json::from_value::<dedup::DedupOutcome>(payload) {
                    report.record(&STEP_DEDUP, artifact.status, true);
                    return Ok(outcome);
                }
            }
        }

        let outcome = dedup::run_dedup_gate(&self.storage.database, &self.config.dedup, item)?;
        let status = if outcome.is_duplicate() {
            StepStatus::Duplicate
        } else {
            StepStatus::Ok
        };
        let payload = serde_json::to_value(&outcome).map_err(|e| MemoraError::Json {
            source: e,
            context: "Failed to serialize dedup artifact".to_string(),
        })?;
        self.record_artifact(item, &STEP_DEDUP, &fp, status, Some(&payload), None)?;
        report.record(&STEP_DEDUP, status, false);
        Ok(outcome)
    }

    fn step_chunk(
        &self,
        item: &SourceItem,
        metadata: &MediaMetadata,
        total_bytes: u64,
        report: &mut PipelineReport,
    ) -> Result<Option<ChunkPlan>> {
        if item.item_type == ItemType::Photo {
            return Ok(None);
        }
        let duration = match metadata.duration_secs {
            Some(d) if d > 0.0 => d,
            _ => return Ok(None),
        };

        let g = &self.config.guardrails;
        let inputs = json!({
            "duration_secs": duration,
            "bitrate_bps": metadata.bitrate_bps,
            "total_bytes": total_bytes,
            "chunk_target_bytes": g.chunk_target_bytes,
            "chunk_max_duration_secs": g.chunk_max_duration_secs,
            "max_chunks": g.max_chunks,
        });
        let fp = fingerprint::fingerprint(STEP_CHUNK.name, STEP_CHUNK.version, &inputs);

        if let Some(artifact) = self.find_artifact(item, &STEP_CHUNK, &fp)? {
            if let Some(payload) = artifact.payload {
                if let Ok(plan) = serde_json::from_value::<ChunkPlan>(payload) {
                    report.record(&STEP_CHUNK, StepStatus::Ok, true);
                    return Ok(Some(plan));
                }
            }
        }

        let plan = chunk::plan_chunks(g, duration, metadata.bitrate_bps, total_bytes);
        if plan.truncated {
            tracing::warn!(item_id = %item.id, "Chunk plan truncated at {} chunks", g.max_chunks);
        }
        let payload = serde_json::to_value(&plan).map_err(|e| MemoraError::Json {
            source: e,
            context: "Failed to serialize chunk plan".to_string(),
        })?;
        self.record_artifact(item, &STEP_CHUNK, &fp, StepStatus::Ok, Some(&payload), None)?;
        report.record(&STEP_CHUNK, StepStatus::Ok, false);
        Ok(Some(plan))
    }

    fn extract_fingerprint(&self, item: &SourceItem, plan: Option<&ChunkPlan>) -> String {
        let chunk_starts: Vec<f64> = plan
            .map(|p| p.chunks.iter().map(|c| c.start_secs).collect())
            .unwrap_or_default();
        fingerprint::fingerprint(
            STEP_EXTRACT.name,
            STEP_EXTRACT.version,
            &json!({
                "content_hash": item.content_hash,
                "chunk_starts": chunk_starts,
            }),
        )
    }

    fn step_extract(
        &self,
        item: &SourceItem,
        media: &[u8],
        metadata: &MediaMetadata,
        plan: Option<&ChunkPlan>,
        report: &mut PipelineReport,
    ) -> Result<ExtractArtifact> {
        let fp = self.extract_fingerprint(item, plan);

        if let Some(artifact) = self.find_artifact(item, &STEP_EXTRACT, &fp)? {
            if let Some(payload) = artifact.payload {
                if let Ok(cached) = serde_json::from_value::<ExtractArtifact>(payload) {
                    report.record(&STEP_EXTRACT, artifact.status, true);
                    return Ok(cached);
                }
            }
        }

        let result = extract::run_extraction(self.model.as_ref(), item, media, metadata, plan);
        let artifact = self.persist_extraction(result)?;

        let status = if artifact.had_errors {
            StepStatus::Error
        } else {
            StepStatus::Ok
        };
        let payload = serde_json::to_value(&artifact).map_err(|e| MemoraError::Json {
            source: e,
            context: "Failed to serialize extract artifact".to_string(),
        })?;
        self.record_artifact(item, &STEP_EXTRACT, &fp, status, Some(&payload), None)?;
        report.record(&STEP_EXTRACT, status, false);
        Ok(artifact)
    }

    /// Move an oversized transcript into the media store; keep small ones inline
    fn persist_extraction(&self, result: ExtractionResult) -> Result<ExtractArtifact> {
        let mut artifact = ExtractArtifact {
            contexts: result.contexts,
            transcript: None,
            transcript_ref: None,
            chunk_statuses: result.chunk_statuses,
            had_errors: result.had_errors,
        };
        if let Some(transcript) = result.transcript {
            if transcript.len() > self.config.guardrails.transcript_inline_threshold {
                let (hash, _, _) = self.storage.media_store.write_text(transcript.as_bytes())?;
                artifact.transcript_ref = Some(hash);
            } else {
                artifact.transcript = Some(transcript);
            }
        }
        Ok(artifact)
    }

    fn step_merge(
        &self,
        item: &SourceItem,
        metadata: &MediaMetadata,
        event_time: i64,
        extract_fp: &str,
        extracted: &ExtractArtifact,
        report: &mut PipelineReport,
    ) -> Result<Vec<ContextRecord>> {
        let inputs = json!({
            "extract_fingerprint": extract_fp,
            "similarity_threshold": self.config.merge.similarity_threshold,
            "event_time": event_time,
        });
        let fp = fingerprint::fingerprint(STEP_MERGE.name, STEP_MERGE.version, &inputs);

        if let Some(artifact) = self.find_artifact(item, &STEP_MERGE, &fp)? {
            if let Some(payload) = artifact.payload {
                if let Ok(cached) = serde_json::from_value::<MergeArtifact>(payload) {
                    let contexts = self.storage.database.get_contexts(&cached.context_ids)?;
                    report.record(&STEP_MERGE, StepStatus::Ok, true);
                    return Ok(contexts);
                }
            }
        }

        let merged = merge::merge_contexts(extracted.contexts.clone(), &self.config.merge);

        // Video/audio contexts span the media duration; photos are instants
        let window = match metadata.duration_secs {
            Some(d) if item.item_type != ItemType::Photo => {
                TimeWindow::new(event_time, event_time + d as i64)
            }
            _ => TimeWindow::instant(event_time),
        };

        let now = chrono::Utc::now().timestamp();
        let mut records = Vec::with_capacity(merged.len());
        for m in merged {
            let mut record = ContextRecord {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: item.user_id.clone(),
                context_type: m.context.context_type,
                title: m.context.title,
                summary: m.context.summary,
                keywords: m.context.keywords,
                entities: m.context.entities,
                location: m.context.location,
                window,
                is_episode: false,
                edited_by_user: false,
                merge_count: m.merge_count,
                item_ids: vec![item.id.clone()],
                merged_from: Vec::new(),
                embed_text: String::new(),
                producer_versions: [
                    (STEP_EXTRACT.name.to_string(), STEP_EXTRACT.version),
                    (STEP_MERGE.name.to_string(), STEP_MERGE.version),
                ]
                .into_iter()
                .collect(),
                day: None,
                created_at: now,
                updated_at: now,
            };
            record.embed_text = record.build_embed_text();
            self.storage.database.upsert_context(&record)?;
            records.push(record);
        }

        let payload = serde_json::to_value(&MergeArtifact {
            context_ids: records.iter().map(|r| r.id.clone()).collect(),
        })
        .map_err(|e| MemoraError::Json {
            source: e,
            context: "Failed to serialize merge artifact".to_string(),
        })?;
        self.record_artifact(item, &STEP_MERGE, &fp, StepStatus::Ok, Some(&payload), None)?;
        report.record(&STEP_MERGE, StepStatus::Ok, false);
        Ok(records)
    }

    fn find_artifact(
        &self,
        item: &SourceItem,
        step: &StepDescriptor,
        fp: &str,
    ) -> Result<Option<crate::storage::DerivedArtifact>> {
        self.storage
            .database
            .find_artifact(&item.id, step.name, step.name, step.version, fp)
    }

    fn record_artifact(
        &self,
        item: &SourceItem,
        step: &StepDescriptor,
        fp: &str,
        status: StepStatus,
        payload: Option<&Value>,
        error: Option<&str>,
    ) -> Result<()> {
        let inserted = self.storage.database.insert_artifact(
            &item.id,
            step.name,
            step.name,
            step.version,
            fp,
            status,
            payload,
            error,
        )?;
        if !inserted {
            tracing::debug!(item_id = %item.id, step = step.name, "Artifact already recorded");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extract::{
        EpisodeSummary, ExtractError, ExtractOutput, ExtractRequest, SummarizeRequest,
    };
    use crate::taxonomy::{Entity, ExtractedContext};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FixedProbe {
        metadata: MediaMetadata,
        fail: bool,
    }

    impl MediaProbe for FixedProbe {
        fn probe(&self, _data: &[u8], _item_type: ItemType) -> Result2<MediaMetadata> {
            if self.fail {
                Err(ExtractError::Probe("corrupt header".to_string()))
            } else {
                Ok(self.metadata.clone())
            }
        }
    }

    type Result2<T> = std::result::Result<T, ExtractError>;

    struct CountingModel {
        calls: AtomicUsize,
    }

    impl ContextModel for CountingModel {
        fn extract(&self, _request: &ExtractRequest) -> Result2<ExtractOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExtractOutput {
                transcript: Some("a short transcript".to_string()),
                contexts: vec![ExtractedContext {
                    context_type: ContextType::Activity,
                    title: "Walking the dog".to_string(),
                    summary: "A walk in the park with the dog".to_string(),
                    keywords: vec!["walk".to_string(), "dog".to_string()],
                    entities: vec![Entity::new("animal", "Rex", 0.9)],
                    location: Some("park".to_string()),
                    confidence: 0.9,
                    importance: 0.6,
                }],
            })
        }

        fn summarize_episode(&self, _request: &SummarizeRequest) -> Result2<EpisodeSummary> {
            Ok(EpisodeSummary {
                title: "t".to_string(),
                summary: "s".to_string(),
            })
        }
    }

    fn setup(probe_fail: bool) -> (TempDir, PipelineRunner, String) {
        let temp = TempDir::new().unwrap();
        let storage =
            Arc::new(StorageManager::new(temp.path().to_path_buf(), usize::MAX).unwrap());

        let (hash, _) = storage.media_store.write(b"fake jpeg bytes").unwrap();
        let item = SourceItem {
            id: "item-1".to_string(),
            user_id: "u1".to_string(),
            item_type: ItemType::Photo,
            storage_ref: hash.clone(),
            content_type: "image/jpeg".to_string(),
            filename: Some("dog.jpg".to_string()),
            content_hash: hash,
            perceptual_hash: None,
            captured_at: None,
            tz_offset_minutes: None,
            provider_captured_at: None,
            received_at: 1_700_000_000,
            event_time: None,
            event_time_source: None,
            event_time_confidence: None,
            status: ItemStatus::Pending,
            canonical_item_id: None,
            created_at: 1_700_000_000,
        };
        storage.database.insert_item(&item).unwrap();

        let probe = Arc::new(FixedProbe {
            metadata: MediaMetadata {
                captured_at: Some(1_699_999_000),
                perceptual_hash: Some(0x1234),
                ..Default::default()
            },
            fail: probe_fail,
        });
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let runner = PipelineRunner::new(storage, Config::default(), probe, model);
        (temp, runner, "item-1".to_string())
    }

    #[test]
    fn test_full_run_produces_contexts() {
        let (_tmp, runner, item_id) = setup(false);
        let report = runner.run_item(&item_id).unwrap();

        assert!(!report.failed);
        assert!(report.duplicate_of.is_none());
        assert_eq!(report.contexts.len(), 1);
        assert_eq!(report.contexts[0].context_type, ContextType::Activity);

        // Event time came from media metadata
        let item = runner.storage.database.get_item(&item_id).unwrap().unwrap();
        assert_eq!(item.event_time, Some(1_699_999_000));
        assert_eq!(item.perceptual_hash, Some(0x1234));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let (_tmp, runner, item_id) = setup(false);
        let first = runner.run_item(&item_id).unwrap();
        let count_after_first = runner.storage.database.artifact_count(&item_id).unwrap();

        let second = runner.run_item(&item_id).unwrap();
        let count_after_second = runner.storage.database.artifact_count(&item_id).unwrap();

        // No new artifacts, same context ids, every step a cache hit
        assert_eq!(count_after_first, count_after_second);
        assert_eq!(
            first.contexts.iter().map(|c| &c.id).collect::<Vec<_>>(),
            second.contexts.iter().map(|c| &c.id).collect::<Vec<_>>()
        );
        assert!(second.outcomes.iter().all(|o| o.cached));
    }

    #[test]
    fn test_probe_failure_fails_item() {
        let (_tmp, runner, item_id) = setup(true);
        let report = runner.run_item(&item_id).unwrap();

        assert!(report.failed);
        assert!(report.contexts.is_empty());
        let item = runner.storage.database.get_item(&item_id).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
    }

    #[test]
    fn test_duplicate_short_circuits_extraction() {
        let (_tmp, runner, item_id) = setup(false);
        runner.run_item(&item_id).unwrap();

        // Second item with identical content bytes
        let first = runner.storage.database.get_item(&item_id).unwrap().unwrap();
        let mut dup = first.clone();
        dup.id = "item-2".to_string();
        dup.status = ItemStatus::Pending;
        dup.perceptual_hash = None;
        dup.event_time = None;
        runner.storage.database.insert_item(&dup).unwrap();

        let report = runner.run_item("item-2").unwrap();
        assert_eq!(report.duplicate_of.as_deref(), Some("item-1"));
        assert!(report.contexts.is_empty());
    }

    #[test]
    fn test_oversize_item_fails_before_extraction() {
        let (_tmp, runner, item_id) = setup(false);
        let mut runner = runner;
        runner.config.guardrails.max_media_bytes = 4;

        let report = runner.run_item(&item_id).unwrap();
        assert!(report.failed);
        assert!(report.contexts.is_empty());
        assert!(report
            .outcomes
            .iter()
            .any(|o| o.step == "extract" && o.status == StepStatus::Skipped));

        let item = runner.storage.database.get_item(&item_id).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
    }

    fn insert_video(storage: &Arc<StorageManager>, id: &str) {
        let (hash, _) = storage.media_store.write(b"fake mp4 bytes").unwrap();
        let item = SourceItem {
            id: id.to_string(),
            user_id: "u1".to_string(),
            item_type: ItemType::Video,
            storage_ref: hash.clone(),
            content_type: "video/mp4".to_string(),
            filename: Some("clip.mp4".to_string()),
            content_hash: hash,
            perceptual_hash: None,
            captured_at: None,
            tz_offset_minutes: None,
            provider_captured_at: None,
            received_at: 1_700_000_000,
            event_time: None,
            event_time_source: None,
            event_time_confidence: None,
            status: ItemStatus::Pending,
            canonical_item_id: None,
            created_at: 1_700_000_000,
        };
        storage.database.insert_item(&item).unwrap();
    }

    #[test]
    fn test_chunk_config_change_recomputes_merge() {
        let temp = TempDir::new().unwrap();
        let storage =
            Arc::new(StorageManager::new(temp.path().to_path_buf(), usize::MAX).unwrap());
        insert_video(&storage, "vid-1");

        // 300s at 8 Mbps: chunk boundaries follow the byte budget
        let probe = Arc::new(FixedProbe {
            metadata: MediaMetadata {
                captured_at: Some(1_699_999_000),
                duration_secs: Some(300.0),
                bitrate_bps: Some(8_000_000),
                ..Default::default()
            },
            fail: false,
        });
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });

        let first_runner = PipelineRunner::new(
            storage.clone(),
            Config::default(),
            probe.clone(),
            model.clone(),
        );
        let first = first_runner.run_item("vid-1").unwrap();

        // Doubling the byte budget shifts every chunk start, which must
        // invalidate extraction and the merge built on top of it
        let mut config = Config::default();
        config.guardrails.chunk_target_bytes *= 2;
        let second_runner = PipelineRunner::new(storage, config, probe, model);
        let second = second_runner.run_item("vid-1").unwrap();

        let merge = second
            .outcomes
            .iter()
            .find(|o| o.step == "merge")
            .unwrap();
        assert!(!merge.cached);
        assert_ne!(
            first.contexts.iter().map(|c| &c.id).collect::<Vec<_>>(),
            second.contexts.iter().map(|c| &c.id).collect::<Vec<_>>()
        );
    }
}
