//! Episode clustering
//!
//! Episodes are activity contexts promoted to `is_episode` that accumulate
//! temporally adjacent items. Each newly processed item's activity context
//! either joins the nearest episode within the configured gap or seeds a new
//! one. Episode titles and summaries regenerate from the member set unless the
//! user has edited them.

pub mod daily;

use crate::config::{EpisodeConfig, MergeConfig};
use crate::embedding::{ContextIndexer, PayloadFilter};
use crate::error::Result;
use crate::pipeline::extract::{ContextModel, SummarizeRequest};
use crate::pipeline::merge;
use crate::storage::models::ContextRecord;
use crate::storage::StorageManager;
use crate::taxonomy::{ContextType, TimeWindow};
use std::sync::Arc;

pub use daily::{day_key, DailySummaryBuilder};

pub struct EpisodeClusterer {
    storage: Arc<StorageManager>,
    indexer: Arc<ContextIndexer>,
    model: Arc<dyn ContextModel>,
    config: EpisodeConfig,
    merge_config: MergeConfig,
}

impl EpisodeClusterer {
    pub fn new(
        storage: Arc<StorageManager>,
        indexer: Arc<ContextIndexer>,
        model: Arc<dyn ContextModel>,
        config: EpisodeConfig,
        merge_config: MergeConfig,
    ) -> Self {
        Self {
            storage,
            indexer,
            model,
            config,
            merge_config,
        }
    }

    /// Cluster a freshly processed item's contexts into an episode.
    ///
    /// Returns the episode the item's activity context landed in (joined or
    /// newly created). Concurrent workers racing on adjacent items may briefly
    /// produce two episodes where one would do; a later join heals nothing
    /// retroactively but keeps both internally consistent.
    pub fn cluster_item(&self, contexts: &[ContextRecord]) -> Result<Option<ContextRecord>> {
        let Some(anchor) = contexts
            .iter()
            .find(|c| c.context_type == ContextType::Activity && !c.is_episode)
        else {
            return Ok(None);
        };

        let db = &self.storage.database;
        let candidates = db.episode_candidates(
            &anchor.user_id,
            anchor.window.start,
            self.config.max_gap_secs,
            self.config.candidate_limit,
        )?;

        // Episodes whose window comes within the gap (inclusive)
        let qualifying: Vec<ContextRecord> = candidates
            .into_iter()
            .filter(|ep| {
                ep.window
                    .distance_to(anchor.window.start)
                    .min(ep.window.distance_to(anchor.window.end))
                    <= self.config.max_gap_secs
            })
            .collect();

        let mut episode = match self.rank_candidates(anchor, qualifying) {
            Some(episode) => {
                tracing::debug!(
                    episode_id = %episode.id,
                    anchor_id = %anchor.id,
                    "Joining existing episode"
                );
                episode
            }
            None => {
                tracing::debug!(anchor_id = %anchor.id, "Starting new episode");
                self.new_episode(anchor)
            }
        };

        if episode.merged_from.contains(&anchor.id) {
            // Reprocessing: this context already belongs to the episode
            return Ok(Some(episode));
        }

        merge::merge_record(&mut episode, anchor);

        // Fold the item's remaining contexts into per-type member buckets
        let mut members = db.get_contexts(&episode.merged_from)?;
        for ctx in contexts.iter().filter(|c| !c.is_episode && c.id != anchor.id) {
            if episode.merged_from.contains(&ctx.id) {
                continue;
            }
            self.fold_member(&mut episode, &mut members, ctx)?;
        }

        self.regenerate_summary(&mut episode)?;

        episode.embed_text = episode.build_embed_text();
        episode.updated_at = chrono::Utc::now().timestamp();
        db.upsert_context(&episode)?;
        self.indexer.index_context(&episode)?;

        Ok(Some(episode))
    }

    /// Best qualifying episode for the anchor: vector similarity over the
    /// candidate window, token overlap when the vector index has nothing there
    fn rank_candidates(
        &self,
        anchor: &ContextRecord,
        mut qualifying: Vec<ContextRecord>,
    ) -> Option<ContextRecord> {
        if qualifying.is_empty() {
            return None;
        }

        let mut filter = PayloadFilter::for_user(&anchor.user_id);
        filter.is_episode = Some(true);
        filter.context_type = Some(ContextType::Activity);
        filter.time_range = Some((
            anchor.window.start - self.config.max_gap_secs,
            anchor.window.end + self.config.max_gap_secs,
        ));

        let pos = self
            .vector_rank(anchor, &qualifying, &filter)
            .unwrap_or_else(|| self.token_rank(anchor, &qualifying));
        Some(qualifying.swap_remove(pos))
    }

    fn vector_rank(
        &self,
        anchor: &ContextRecord,
        qualifying: &[ContextRecord],
        filter: &PayloadFilter,
    ) -> Option<usize> {
        let query = match self.indexer.embed_query(&anchor.embed_text) {
            Ok(vector) => vector,
            Err(e) => {
                tracing::debug!(anchor_id = %anchor.id, "Candidate embedding failed: {}", e);
                return None;
            }
        };
        let hits = match self.indexer.vector_index().search(
            &query,
            qualifying.len(),
            qualifying.len(),
            filter,
        ) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::debug!(anchor_id = %anchor.id, "Candidate vector search failed: {}", e);
                return None;
            }
        };
        hits.iter()
            .find_map(|hit| qualifying.iter().position(|ep| ep.id == hit.id))
    }

    fn token_rank(&self, anchor: &ContextRecord, qualifying: &[ContextRecord]) -> usize {
        let anchor_tokens = merge::tokenize(&anchor.embed_text);
        qualifying
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                let sa = merge::jaccard(&merge::tokenize(&a.embed_text), &anchor_tokens);
                let sb = merge::jaccard(&merge::tokenize(&b.embed_text), &anchor_tokens);
                sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Fold one non-anchor context into the episode. A sufficiently similar
    /// same-type member absorbs it; otherwise it joins as a new member.
    fn fold_member(
        &self,
        episode: &mut ContextRecord,
        members: &mut Vec<ContextRecord>,
        ctx: &ContextRecord,
    ) -> Result<()> {
        let bucket = members
            .iter_mut()
            .find(|m| m.id != ctx.id && merge::records_should_merge(m, ctx, &self.merge_config));

        match bucket {
            Some(member) => {
                merge::merge_record(member, ctx);
                member.embed_text = member.build_embed_text();
                member.updated_at = chrono::Utc::now().timestamp();
                self.storage.database.upsert_context(member)?;
                self.indexer.index_context(member)?;

                episode.window = episode.window.union(&ctx.window);
                for item_id in &ctx.item_ids {
                    if !episode.item_ids.contains(item_id) {
                        episode.item_ids.push(item_id.clone());
                    }
                }
                if !episode.merged_from.contains(&ctx.id) {
                    episode.merged_from.push(ctx.id.clone());
                }
            }
            None => {
                merge::merge_record(episode, ctx);
                members.push(ctx.clone());
            }
        }
        Ok(())
    }

    fn new_episode(&self, anchor: &ContextRecord) -> ContextRecord {
        let now = chrono::Utc::now().timestamp();
        ContextRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: anchor.user_id.clone(),
            context_type: ContextType::Activity,
            title: String::new(),
            summary: String::new(),
            keywords: Vec::new(),
            entities: Vec::new(),
            location: None,
            window: anchor.window,
            is_episode: true,
            edited_by_user: false,
            merge_count: 0,
            item_ids: Vec::new(),
            merged_from: Vec::new(),
            embed_text: String::new(),
            producer_versions: anchor.producer_versions.clone(),
            day: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Regenerate the episode title/summary from its members. User edits are
    /// sticky: once `edited_by_user` is set, regeneration never overwrites.
    fn regenerate_summary(&self, episode: &mut ContextRecord) -> Result<()> {
        if episode.edited_by_user {
            return Ok(());
        }

        let members = self.storage.database.get_contexts(&episode.merged_from)?;
        let lines: Vec<String> = members
            .iter()
            .map(|c| format!("{} — {}", c.title, c.summary))
            .collect();
        if lines.is_empty() {
            return Ok(());
        }

        match self.model.summarize_episode(&SummarizeRequest { lines: &lines }) {
            Ok(summary) => {
                episode.title = summary.title;
                episode.summary = summary.summary;
            }
            Err(e) => {
                // Keep the merged text; regeneration is best-effort
                tracing::warn!(episode_id = %episode.id, "Episode summarization failed: {}", e);
            }
        }
        Ok(())
    }

    /// Record a user edit to an episode and pin it against regeneration.
    ///
    /// A supplied window widens the episode to cover it; episodes never shrink
    /// below the span of their members.
    pub fn apply_user_edit(
        &self,
        episode_id: &str,
        title: Option<String>,
        summary: Option<String>,
        window: Option<TimeWindow>,
    ) -> Result<ContextRecord> {
        let db = &self.storage.database;
        let mut episode = db
            .get_context(episode_id)?
            .ok_or_else(|| crate::error::MemoraError::ContextNotFound {
                id: episode_id.to_string(),
            })?;

        if let Some(title) = title {
            episode.title = title;
        }
        if let Some(summary) = summary {
            episode.summary = summary;
        }
        if let Some(window) = window {
            episode.window = episode.window.union(&window);
        }
        episode.edited_by_user = true;
        episode.embed_text = episode.build_embed_text();
        episode.updated_at = chrono::Utc::now().timestamp();

        db.upsert_context(&episode)?;
        self.indexer.index_context(&episode)?;
        Ok(episode)
    }
}
