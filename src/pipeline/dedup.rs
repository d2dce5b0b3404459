//! Dedup gate: exact and near-duplicate detection ahead of expensive steps
//!
//! Exact duplicates match on content hash scoped to one user. Near duplicates
//! (images only) compare perceptual hashes by Hamming distance against a
//! rolling window of the user's recent items. Duplicates always persist as
//! SourceItems for provenance; whether they still run model calls is a
//! configuration decision.

use crate::config::DedupConfig;
use crate::error::Result;
use crate::storage::models::{ItemType, SourceItem};
use crate::storage::Database;
use serde::{Deserialize, Serialize};

/// Outcome of the dedup gate, recorded as the step's artifact payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupOutcome {
    pub duplicate_of: Option<String>,
    pub exact: bool,
    pub hamming_distance: Option<u32>,
}

impl DedupOutcome {
    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }
}

/// Hamming distance between two 64-bit perceptual hashes
pub fn hamming_distance(a: i64, b: i64) -> u32 {
    (a ^ b).count_ones()
}

/// Run the dedup gate for one item. Links `canonical_item_id` on a match.
pub fn run_dedup_gate(
    db: &Database,
    config: &DedupConfig,
    item: &SourceItem,
) -> Result<DedupOutcome> {
    // Exact: whole-byte digest match within the same user
    if let Some(canonical) = db.find_item_by_content_hash(&item.user_id, &item.content_hash)? {
        if canonical != item.id {
            db.set_canonical_item(&item.id, &canonical)?;
            tracing::debug!(item_id = %item.id, canonical = %canonical, "Exact duplicate");
            return Ok(DedupOutcome {
                duplicate_of: Some(canonical),
                exact: true,
                hamming_distance: None,
            });
        }
    }

    // Near: perceptual hash window, images only
    if item.item_type == ItemType::Photo {
        if let Some(phash) = item.perceptual_hash {
            let window = db.recent_phash_items(&item.user_id, &item.id, config.phash_window)?;
            let mut best: Option<(String, u32)> = None;
            for (candidate_id, candidate_phash) in window {
                let distance = hamming_distance(phash, candidate_phash);
                if distance < config.phash_hamming_threshold {
                    match &best {
                        Some((_, best_distance)) if *best_distance <= distance => {}
                        _ => best = Some((candidate_id, distance)),
                    }
                }
            }

            if let Some((canonical, distance)) = best {
                db.set_canonical_item(&item.id, &canonical)?;
                tracing::debug!(
                    item_id = %item.id,
                    canonical = %canonical,
                    distance,
                    "Near duplicate (perceptual)"
                );
                return Ok(DedupOutcome {
                    duplicate_of: Some(canonical),
                    exact: false,
                    hamming_distance: Some(distance),
                });
            }
        }
    }

    Ok(DedupOutcome::default())
}
