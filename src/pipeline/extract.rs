//! Context extraction: collaborator traits and the extraction step
//!
//! The multimodal model itself is an external collaborator. This module owns
//! the contract: media bytes (+ any derived text) in, validated taxonomy
//! payloads out, with chunking, guardrails, and a generic fallback so every
//! accepted item ends up with at least one activity context. Items the
//! guardrails reject never reach extraction and fail instead.

use crate::config::GuardrailConfig;
use crate::pipeline::chunk::{ChunkPlan, ChunkSpec, ChunkStatus};
use crate::storage::models::{ItemType, SourceItem};
use crate::taxonomy::{ContextType, ExtractedContext};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Model call failed: {0}")]
    Model(String),

    #[error("Unsupported media: {0}")]
    Unsupported(String),

    #[error("Probe failed: {0}")]
    Probe(String),
}

/// Embedded/derived media metadata from the probing collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaMetadata {
    /// Capture timestamp embedded in the media (UTC seconds)
    pub captured_at: Option<i64>,
    pub duration_secs: Option<f64>,
    pub bitrate_bps: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// 64-bit perceptual hash (images)
    pub perceptual_hash: Option<i64>,
    /// OCR text recognized in the image, if any
    pub ocr_text: Option<String>,
}

/// Collaborator that inspects raw media bytes (EXIF, container headers, OCR)
pub trait MediaProbe: Send + Sync {
    fn probe(&self, data: &[u8], item_type: ItemType) -> Result<MediaMetadata, ExtractError>;
}

/// One extraction request to the model collaborator
pub struct ExtractRequest<'a> {
    pub item: &'a SourceItem,
    pub media: &'a [u8],
    /// OCR text or a prior transcript fragment to condition on
    pub derived_text: Option<&'a str>,
    /// Set for chunked video/audio extraction
    pub chunk: Option<&'a ChunkSpec>,
}

/// Model output for one request: a transcript fragment plus 1..5 contexts
#[derive(Debug, Clone, Default)]
pub struct ExtractOutput {
    pub transcript: Option<String>,
    pub contexts: Vec<ExtractedContext>,
}

/// Summarization request used when an episode's member set changes
pub struct SummarizeRequest<'a> {
    /// One line per member context, title then summary
    pub lines: &'a [String],
}

#[derive(Debug, Clone)]
pub struct EpisodeSummary {
    pub title: String,
    pub summary: String,
}

/// The multimodal model collaborator contract
pub trait ContextModel: Send + Sync {
    fn extract(&self, request: &ExtractRequest) -> Result<ExtractOutput, ExtractError>;

    fn summarize_episode(&self, request: &SummarizeRequest)
        -> Result<EpisodeSummary, ExtractError>;
}

/// Maximum contexts a single chunk may contribute
pub const MAX_CONTEXTS_PER_CHUNK: usize = 5;

/// Result of running extraction over a whole item
#[derive(Debug, Default)]
pub struct ExtractionResult {
    pub contexts: Vec<(Option<usize>, ExtractedContext)>,
    pub transcript: Option<String>,
    pub chunk_statuses: Vec<ChunkStatus>,
    /// True if any model call failed (step recorded as error, item continues)
    pub had_errors: bool,
}

/// Run extraction for an item, chunk by chunk for video/audio
pub fn run_extraction(
    model: &dyn ContextModel,
    item: &SourceItem,
    media: &[u8],
    metadata: &MediaMetadata,
    plan: Option<&ChunkPlan>,
) -> ExtractionResult {
    let mut result = ExtractionResult::default();
    let mut fragments: Vec<String> = Vec::new();

    match plan {
        Some(plan) => {
            for chunk in &plan.chunks {
                if chunk.skipped {
                    result.chunk_statuses.push(ChunkStatus {
                        index: chunk.index,
                        status: "skipped".to_string(),
                    });
                    continue;
                }

                let request = ExtractRequest {
                    item,
                    media,
                    derived_text: metadata.ocr_text.as_deref(),
                    chunk: Some(chunk),
                };

                match model.extract(&request) {
                    Ok(output) => {
                        collect_output(&mut result, &mut fragments, output, Some(chunk.index));
                        result.chunk_statuses.push(ChunkStatus {
                            index: chunk.index,
                            status: "ok".to_string(),
                        });
                    }
                    Err(e) => {
                        tracing::warn!(item_id = %item.id, chunk = chunk.index, "Chunk extraction failed: {}", e);
                        result.had_errors = true;
                        result.chunk_statuses.push(ChunkStatus {
                            index: chunk.index,
                            status: "error".to_string(),
                        });
                    }
                }
            }
        }
        None => {
            let request = ExtractRequest {
                item,
                media,
                derived_text: metadata.ocr_text.as_deref(),
                chunk: None,
            };
            match model.extract(&request) {
                Ok(output) => collect_output(&mut result, &mut fragments, output, None),
                Err(e) => {
                    tracing::warn!(item_id = %item.id, "Extraction failed: {}", e);
                    result.had_errors = true;
                }
            }
        }
    }

    if !fragments.is_empty() {
        result.transcript = Some(fragments.join("\n"));
    }

    // Guarantee: at least one activity context per item. No transcript or a
    // failed model call falls back to a generic context built from metadata.
    let has_activity = result
        .contexts
        .iter()
        .any(|(_, c)| c.context_type == ContextType::Activity);
    if !has_activity {
        result.contexts.push((None, fallback_context(item)));
    }

    result
}

fn collect_output(
    result: &mut ExtractionResult,
    fragments: &mut Vec<String>,
    output: ExtractOutput,
    chunk_index: Option<usize>,
) {
    if let Some(fragment) = output.transcript {
        if !fragment.is_empty() {
            fragments.push(fragment);
        }
    }

    for ctx in output.contexts.into_iter().take(MAX_CONTEXTS_PER_CHUNK) {
        match ctx.validate() {
            Ok(()) => result.contexts.push((chunk_index, ctx)),
            Err(e) => {
                tracing::warn!("Dropping invalid model context: {}", e);
                result.had_errors = true;
            }
        }
    }
}

/// Generic activity context used when the model produced nothing usable
pub fn fallback_context(item: &SourceItem) -> ExtractedContext {
    let noun = match item.item_type {
        ItemType::Photo => "photo",
        ItemType::Video => "video",
        ItemType::Audio => "audio recording",
    };
    let title = match &item.filename {
        Some(name) => format!("Captured {} ({})", noun, name),
        None => format!("Captured {}", noun),
    };
    ExtractedContext {
        context_type: ContextType::Activity,
        title,
        summary: format!("A {} captured by the user", noun),
        keywords: vec![noun.split(' ').next().unwrap_or(noun).to_string()],
        entities: vec![],
        location: None,
        confidence: 0.2,
        importance: 0.2,
    }
}

/// Guardrail check applied before extraction; rejected items never reach the model
pub fn check_guardrails(
    guardrails: &GuardrailConfig,
    media_len: u64,
    metadata: &MediaMetadata,
) -> std::result::Result<(), String> {
    if media_len > guardrails.max_media_bytes {
        return Err(format!(
            "media size {} exceeds limit {}",
            media_len, guardrails.max_media_bytes
        ));
    }
    if let Some(duration) = metadata.duration_secs {
        if duration > guardrails.max_duration_secs as f64 {
            return Err(format!(
                "duration {:.0}s exceeds limit {}s",
                duration, guardrails.max_duration_secs
            ));
        }
    }
    Ok(())
}
