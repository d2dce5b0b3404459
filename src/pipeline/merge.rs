//! Within-item context merging
//!
//! Extraction can emit near-identical contexts of the same type. A greedy
//! Jaccard pass over title/summary/keyword tokens folds them down before
//! persistence; contexts from different chunks of the same media stay
//! separate. The same merge policy is reused when episodes fold per-type
//! member contexts together.

use crate::config::MergeConfig;
use crate::storage::models::ContextRecord;
use crate::taxonomy::{Entity, ExtractedContext};
use ahash::AHashSet;

/// Lowercased alphanumeric tokens from a piece of text
pub fn tokenize(text: &str) -> AHashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Jaccard similarity of two token sets
pub fn jaccard(a: &AHashSet<String>, b: &AHashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

fn context_tokens(ctx: &ExtractedContext) -> AHashSet<String> {
    let mut tokens = tokenize(&ctx.title);
    tokens.extend(tokenize(&ctx.summary));
    for kw in &ctx.keywords {
        tokens.extend(tokenize(kw));
    }
    tokens
}

/// Whether two same-type contexts should merge.
///
/// Identical or substring titles merge immediately; otherwise the token
/// similarity must reach the configured threshold (inclusive).
pub fn should_merge(a: &ExtractedContext, b: &ExtractedContext, config: &MergeConfig) -> bool {
    if a.context_type != b.context_type {
        return false;
    }
    let ta = a.title.trim().to_lowercase();
    let tb = b.title.trim().to_lowercase();
    if ta == tb || ta.contains(&tb) || tb.contains(&ta) {
        return true;
    }
    jaccard(&context_tokens(a), &context_tokens(b)) >= config.similarity_threshold
}

/// Fold `other` into `base` in place
pub fn merge_into(base: &mut ExtractedContext, other: ExtractedContext) {
    if other.title.len() > base.title.len() {
        base.title = other.title;
    }
    if !other.summary.is_empty() && other.summary != base.summary {
        if base.summary.is_empty() {
            base.summary = other.summary;
        } else {
            base.summary = format!("{}; {}", base.summary, other.summary);
        }
    }
    for kw in other.keywords {
        if !base.keywords.iter().any(|k| k.eq_ignore_ascii_case(&kw)) {
            base.keywords.push(kw);
        }
    }
    for entity in other.entities {
        if !base
            .entities
            .iter()
            .any(|e| e.name.eq_ignore_ascii_case(&entity.name) && e.entity_type == entity.entity_type)
        {
            base.entities.push(entity);
        }
    }
    if base.location.is_none() {
        base.location = other.location;
    }
    base.confidence = base.confidence.max(other.confidence);
    base.importance = base.importance.max(other.importance);
}

/// A merged context with the number of source contexts it absorbed
#[derive(Debug, Clone)]
pub struct MergedContext {
    pub context: ExtractedContext,
    pub merge_count: i64,
    /// Chunk indices the merged context came from, when known
    pub chunk_indices: Vec<usize>,
}

/// A chunked context only folds into an accumulator from the same chunk,
/// or into one that is not chunk-bound at all
fn chunk_compatible(m: &MergedContext, chunk: Option<usize>) -> bool {
    match chunk {
        None => true,
        Some(idx) => m.chunk_indices.is_empty() || m.chunk_indices.contains(&idx),
    }
}

/// Greedy single-pass merge over an item's extracted contexts.
///
/// Contexts are processed in extraction order; each either folds into the
/// first sufficiently-similar accumulated context of its type and chunk or
/// starts a new one. Order dependence is accepted: extraction order is stable
/// per item.
pub fn merge_contexts(
    contexts: Vec<(Option<usize>, ExtractedContext)>,
    config: &MergeConfig,
) -> Vec<MergedContext> {
    let mut merged: Vec<MergedContext> = Vec::new();

    for (chunk, ctx) in contexts {
        let target = merged
            .iter_mut()
            .find(|m| chunk_compatible(m, chunk) && should_merge(&m.context, &ctx, config));
        match target {
            Some(m) => {
                merge_into(&mut m.context, ctx);
                m.merge_count += 1;
                if let Some(idx) = chunk {
                    if !m.chunk_indices.contains(&idx) {
                        m.chunk_indices.push(idx);
                    }
                }
            }
            None => merged.push(MergedContext {
                context: ctx,
                merge_count: 0,
                chunk_indices: chunk.into_iter().collect(),
            }),
        }
    }

    merged
}

fn record_tokens(record: &ContextRecord) -> AHashSet<String> {
    let mut tokens = tokenize(&record.title);
    tokens.extend(tokenize(&record.summary));
    for kw in &record.keywords {
        tokens.extend(tokenize(kw));
    }
    tokens
}

/// Record-level variant of [`should_merge`], applied when an episode folds a
/// new member context into an existing per-type bucket.
pub fn records_should_merge(
    a: &ContextRecord,
    b: &ContextRecord,
    config: &MergeConfig,
) -> bool {
    if a.context_type != b.context_type {
        return false;
    }
    let ta = a.title.trim().to_lowercase();
    let tb = b.title.trim().to_lowercase();
    if ta == tb || ta.contains(&tb) || tb.contains(&ta) {
        return true;
    }
    jaccard(&record_tokens(a), &record_tokens(b)) >= config.similarity_threshold
}

/// Fold a member context into an existing episode-level record of the same
/// type. Used by episode clustering when a new item joins an episode.
pub fn merge_record(base: &mut ContextRecord, member: &ContextRecord) {
    if member.title.len() > base.title.len() && !base.edited_by_user {
        base.title = member.title.clone();
    }
    if !member.summary.is_empty() && member.summary != base.summary && !base.edited_by_user {
        if base.summary.is_empty() {
            base.summary = member.summary.clone();
        } else {
            base.summary = format!("{}; {}", base.summary, member.summary);
        }
    }
    for kw in &member.keywords {
        if !base.keywords.iter().any(|k| k.eq_ignore_ascii_case(kw)) {
            base.keywords.push(kw.clone());
        }
    }
    for entity in &member.entities {
        if !entity_present(&base.entities, entity) {
            base.entities.push(entity.clone());
        }
    }
    if base.location.is_none() {
        base.location = member.location.clone();
    }
    base.window = base.window.union(&member.window);
    for item_id in &member.item_ids {
        if !base.item_ids.contains(item_id) {
            base.item_ids.push(item_id.clone());
        }
    }
    if !base.merged_from.contains(&member.id) {
        base.merged_from.push(member.id.clone());
    }
    base.merge_count += 1;
}

fn entity_present(entities: &[Entity], candidate: &Entity) -> bool {
    entities
        .iter()
        .any(|e| e.name.eq_ignore_ascii_case(&candidate.name) && e.entity_type == candidate.entity_type)
}
