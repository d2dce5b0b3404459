//! Read-side service surface: search, timeline, and episode detail
//!
//! Thin DTO layer over the retriever and the relational store, shaped for a
//! transport adapter (HTTP, CLI) to serialize directly.

use crate::error::{MemoraError, Result};
use crate::query::understand;
use crate::retrieval::{HybridRetriever, ScoredContext};
use crate::storage::models::{ContextRecord, SourceItem};
use crate::storage::StorageManager;
use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One retrieved or browsed context, flattened for serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextHit {
    pub id: String,
    pub context_type: String,
    pub title: String,
    pub summary: String,
    pub is_episode: bool,
    pub time_start: i64,
    pub time_end: i64,
    pub item_ids: Vec<String>,
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl ContextHit {
    fn from_record(record: &ContextRecord, score: Option<f32>, snippet: Option<String>) -> Self {
        Self {
            id: record.id.clone(),
            context_type: record.context_type.as_str().to_string(),
            title: record.title.clone(),
            summary: record.summary.clone(),
            is_episode: record.is_episode,
            time_start: record.window.start,
            time_end: record.window.end,
            item_ids: record.item_ids.clone(),
            score,
            snippet,
        }
    }

    fn from_scored(scored: &ScoredContext) -> Self {
        Self::from_record(&scored.context, Some(scored.score), scored.snippet.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<ContextHit>,
    /// True when the search deadline expired; hits may be empty or partial
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineItem {
    pub id: String,
    pub item_type: String,
    pub event_time: Option<i64>,
    pub status: String,
    pub filename: Option<String>,
    /// Present when this item was folded into an earlier duplicate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_item_id: Option<String>,
}

impl TimelineItem {
    fn from_item(item: &SourceItem) -> Self {
        Self {
            id: item.id.clone(),
            item_type: item.item_type.as_str().to_string(),
            event_time: item.event_time,
            status: item.status.as_str().to_string(),
            filename: item.filename.clone(),
            canonical_item_id: item.canonical_item_id.clone(),
        }
    }
}

/// One local-calendar day of a user's life
#[derive(Debug, Serialize, Deserialize)]
pub struct TimelineDay {
    pub day: String,
    pub items: Vec<TimelineItem>,
    pub episodes: Vec<ContextHit>,
    pub daily_summary: Option<ContextHit>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EpisodeDetail {
    pub episode: ContextHit,
    /// Member contexts in chronological order
    pub members: Vec<ContextHit>,
}

pub struct SearchService {
    storage: Arc<StorageManager>,
    retriever: HybridRetriever,
}

impl SearchService {
    pub fn new(storage: Arc<StorageManager>, retriever: HybridRetriever) -> Self {
        Self { storage, retriever }
    }

    /// Understand a natural-language query and retrieve evidence for it
    pub async fn search(
        &self,
        user_id: &str,
        query_text: &str,
        tz_offset_minutes: i32,
    ) -> Result<SearchResponse> {
        let query = understand(query_text, tz_offset_minutes, Utc::now());
        let evidence = self
            .retriever
            .search(user_id, &query)
            .await
            .map_err(|e| MemoraError::Search(e.to_string()))?;

        Ok(SearchResponse {
            hits: evidence.evidence.iter().map(ContextHit::from_scored).collect(),
            timed_out: evidence.timed_out,
        })
    }

    /// Items, episodes, and the daily summary for one local-calendar day
    pub fn timeline(
        &self,
        user_id: &str,
        day: &str,
        tz_offset_minutes: i32,
    ) -> Result<TimelineDay> {
        let (start, end) = local_day_bounds(day, tz_offset_minutes)
            .ok_or_else(|| MemoraError::Search(format!("Unparseable day: {}", day)))?;
        let db = &self.storage.database;

        let items = db
            .items_in_range(user_id, start, end)?
            .iter()
            .map(TimelineItem::from_item)
            .collect();
        let episodes = db
            .episodes_in_range(user_id, start, end)?
            .iter()
            .map(|e| ContextHit::from_record(e, None, None))
            .collect();
        let daily_summary = db
            .daily_summary(user_id, day)?
            .map(|s| ContextHit::from_record(&s, None, None));

        Ok(TimelineDay {
            day: day.to_string(),
            items,
            episodes,
            daily_summary,
        })
    }

    /// An episode plus its member contexts
    pub fn episode_detail(&self, episode_id: &str) -> Result<EpisodeDetail> {
        let db = &self.storage.database;
        let episode = db
            .get_context(episode_id)?
            .ok_or_else(|| MemoraError::ContextNotFound {
                id: episode_id.to_string(),
            })?;
        if !episode.is_episode {
            return Err(MemoraError::Search(format!(
                "Context is not an episode: {}",
                episode_id
            )));
        }

        let mut members = db.get_contexts(&episode.merged_from)?;
        members.sort_by_key(|m| m.window.start);

        Ok(EpisodeDetail {
            episode: ContextHit::from_record(&episode, None, None),
            members: members
                .iter()
                .map(|m| ContextHit::from_record(m, None, None))
                .collect(),
        })
    }
}

/// UTC second range [start, end] for a calendar day in the user's timezone
fn local_day_bounds(day: &str, tz_offset_minutes: i32) -> Option<(i64, i64)> {
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
    let offset = FixedOffset::east_opt(tz_offset_minutes * 60)?;
    let start = offset
        .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
        .single()?;
    let end = offset
        .from_local_datetime(&date.and_hms_opt(23, 59, 59)?)
        .single()?;
    Some((start.timestamp(), end.timestamp()))
}
