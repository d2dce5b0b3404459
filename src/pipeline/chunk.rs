//! Chunk planning for video/audio extraction
//!
//! Chunks are bounded by a target byte budget and a maximum duration; video
//! chunk sizes are additionally derived from the container bitrate. Chunk
//! counts are capped, and individual chunks that would blow the byte budget
//! are planned as skipped rather than sent to the model.

use crate::config::GuardrailConfig;
use serde::{Deserialize, Serialize};

/// One planned extraction chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub index: usize,
    pub start_secs: f64,
    pub duration_secs: f64,
    /// Estimated payload size derived from bitrate
    pub est_bytes: u64,
    /// Planned as skipped (oversized); recorded but never extracted
    pub skipped: bool,
}

/// Per-chunk outcome recorded on the extract artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStatus {
    pub index: usize,
    pub status: String,
}

/// Full chunk plan for one item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub chunks: Vec<ChunkSpec>,
    /// True when the duration required more chunks than max_chunks allows
    pub truncated: bool,
}

/// Plan chunks for a media stream of the given duration.
///
/// `bitrate_bps` comes from the probe when available; otherwise it is derived
/// from total size over duration. Chunk duration is the tighter of the
/// configured duration cap and the duration that fits the byte budget.
pub fn plan_chunks(
    guardrails: &GuardrailConfig,
    duration_secs: f64,
    bitrate_bps: Option<u64>,
    total_bytes: u64,
) -> ChunkPlan {
    let bytes_per_sec = match bitrate_bps {
        Some(bps) if bps > 0 => (bps / 8).max(1),
        _ => {
            if duration_secs > 0.0 {
                ((total_bytes as f64 / duration_secs) as u64).max(1)
            } else {
                1
            }
        }
    };

    let budget_secs = guardrails.chunk_target_bytes as f64 / bytes_per_sec as f64;
    let chunk_secs = budget_secs.min(guardrails.chunk_max_duration_secs as f64).max(1.0);

    let needed = (duration_secs / chunk_secs).ceil().max(1.0) as usize;
    let truncated = needed > guardrails.max_chunks;
    let count = needed.min(guardrails.max_chunks);

    let oversize_limit = guardrails.chunk_target_bytes.saturating_mul(2);

    let mut chunks = Vec::with_capacity(count);
    for index in 0..count {
        let start = index as f64 * chunk_secs;
        let duration = chunk_secs.min(duration_secs - start).max(0.0);
        let est_bytes = (duration * bytes_per_sec as f64) as u64;
        chunks.push(ChunkSpec {
            index,
            start_secs: start,
            duration_secs: duration,
            est_bytes,
            skipped: est_bytes > oversize_limit,
        });
    }

    ChunkPlan { chunks, truncated }
}
