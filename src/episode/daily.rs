//! Daily summaries
//!
//! One daily_summary context per (user, calendar day), rebuilt wholesale from
//! the day's episodes whenever one of them changes. The day key is the UTC
//! date of the event window start.

use crate::embedding::ContextIndexer;
use crate::error::Result;
use crate::pipeline::extract::{ContextModel, SummarizeRequest};
use crate::storage::models::ContextRecord;
use crate::storage::StorageManager;
use crate::taxonomy::{ContextType, TimeWindow};
use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::Arc;

/// UTC calendar day key ("YYYY-MM-DD") for a timestamp
pub fn day_key(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

/// UTC second range [start, end] covered by a day key
pub fn day_bounds(day: &str) -> Option<(i64, i64)> {
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
    let start = date.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
    Some((start, start + 86_400 - 1))
}

pub struct DailySummaryBuilder {
    storage: Arc<StorageManager>,
    indexer: Arc<ContextIndexer>,
    model: Arc<dyn ContextModel>,
}

impl DailySummaryBuilder {
    pub fn new(
        storage: Arc<StorageManager>,
        indexer: Arc<ContextIndexer>,
        model: Arc<dyn ContextModel>,
    ) -> Self {
        Self {
            storage,
            indexer,
            model,
        }
    }

    /// Rebuild the daily summary for one user-day from its episodes.
    ///
    /// Full replace: the existing summary's content is discarded, but its id
    /// is reused so index entries and references stay stable. A day with no
    /// episodes gets its summary (if any) deleted.
    pub fn rebuild(&self, user_id: &str, day: &str) -> Result<Option<ContextRecord>> {
        let db = &self.storage.database;
        let Some((start, end)) = day_bounds(day) else {
            tracing::warn!(day, "Unparseable day key, skipping daily summary");
            return Ok(None);
        };

        let episodes: Vec<ContextRecord> = db
            .episodes_in_range(user_id, start, end)?
            .into_iter()
            .filter(|ep| day_key(ep.window.start) == day)
            .collect();

        let existing = db.daily_summary(user_id, day)?;

        if episodes.is_empty() {
            if let Some(stale) = existing {
                db.delete_context(&stale.id)?;
                self.indexer.remove_context(&stale.id)?;
            }
            return Ok(None);
        }

        let lines: Vec<String> = episodes
            .iter()
            .map(|ep| format!("{} — {}", ep.title, ep.summary))
            .collect();
        let (title, summary) = match self.model.summarize_episode(&SummarizeRequest { lines: &lines }) {
            Ok(s) => (s.title, s.summary),
            Err(e) => {
                tracing::warn!(user_id, day, "Daily summarization failed, joining titles: {}", e);
                (
                    format!("Day of {}", day),
                    episodes.iter().map(|ep| ep.title.as_str()).collect::<Vec<_>>().join("; "),
                )
            }
        };

        let window = episodes
            .iter()
            .map(|ep| ep.window)
            .reduce(|a, b| a.union(&b))
            .unwrap_or(TimeWindow::new(start, end));

        let mut keywords: Vec<String> = Vec::new();
        let mut entities = Vec::new();
        let mut item_ids: Vec<String> = Vec::new();
        for ep in &episodes {
            for kw in &ep.keywords {
                if !keywords.iter().any(|k| k.eq_ignore_ascii_case(kw)) {
                    keywords.push(kw.clone());
                }
            }
            for entity in &ep.entities {
                if !entities
                    .iter()
                    .any(|e: &crate::taxonomy::Entity| e.name.eq_ignore_ascii_case(&entity.name))
                {
                    entities.push(entity.clone());
                }
            }
            for item_id in &ep.item_ids {
                if !item_ids.contains(item_id) {
                    item_ids.push(item_id.clone());
                }
            }
        }

        let now = chrono::Utc::now().timestamp();
        let mut record = ContextRecord {
            id: existing
                .as_ref()
                .map(|c| c.id.clone())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            user_id: user_id.to_string(),
            context_type: ContextType::DailySummary,
            title,
            summary,
            keywords,
            entities,
            location: None,
            window,
            is_episode: false,
            edited_by_user: false,
            merge_count: episodes.len() as i64,
            item_ids,
            merged_from: episodes.iter().map(|ep| ep.id.clone()).collect(),
            embed_text: String::new(),
            producer_versions: existing
                .as_ref()
                .map(|c| c.producer_versions.clone())
                .unwrap_or_default(),
            day: Some(day.to_string()),
            created_at: existing.as_ref().map(|c| c.created_at).unwrap_or(now),
            updated_at: now,
        };
        record.embed_text = record.build_embed_text();

        db.upsert_context(&record)?;
        self.indexer.index_context(&record)?;
        Ok(Some(record))
    }
}
