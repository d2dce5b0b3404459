//! Query surface over the relational store

use crate::error::{MemoraError, Result};
use crate::storage::models::{
    ContextRecord, DerivedArtifact, EventTimeSource, ItemStatus, ItemType, SourceItem, StepStatus,
};
use crate::storage::Database;
use crate::taxonomy::{ContextType, Entity, TimeWindow};
use rusqlite::{params, Row};
use std::collections::HashMap;

fn json_err(context: &str) -> impl FnOnce(serde_json::Error) -> MemoraError + '_ {
    move |e| MemoraError::Json {
        source: e,
        context: context.to_string(),
    }
}

fn row_to_item(row: &Row) -> rusqlite::Result<SourceItem> {
    let item_type: String = row.get("item_type")?;
    let status: String = row.get("status")?;
    let source: Option<String> = row.get("event_time_source")?;

    Ok(SourceItem {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        item_type: ItemType::parse(&item_type).unwrap_or(ItemType::Photo),
        storage_ref: row.get("storage_ref")?,
        content_type: row.get("content_type")?,
        filename: row.get("filename")?,
        content_hash: row.get("content_hash")?,
        perceptual_hash: row.get("perceptual_hash")?,
        captured_at: row.get("captured_at")?,
        tz_offset_minutes: row.get("tz_offset_minutes")?,
        provider_captured_at: row.get("provider_captured_at")?,
        received_at: row.get("received_at")?,
        event_time: row.get("event_time")?,
        event_time_source: source.as_deref().and_then(EventTimeSource::parse),
        event_time_confidence: row.get("event_time_confidence")?,
        status: ItemStatus::parse(&status).unwrap_or(ItemStatus::Pending),
        canonical_item_id: row.get("canonical_item_id")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_artifact(row: &Row) -> rusqlite::Result<DerivedArtifact> {
    let status: String = row.get("status")?;
    let payload: Option<String> = row.get("payload")?;

    Ok(DerivedArtifact {
        id: row.get("id")?,
        item_id: row.get("item_id")?,
        kind: row.get("kind")?,
        producer: row.get("producer")?,
        producer_version: row.get::<_, i64>("producer_version")? as u32,
        fingerprint: row.get("fingerprint")?,
        status: StepStatus::parse(&status).unwrap_or(StepStatus::Error),
        payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
        error: row.get("error")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_context(row: &Row) -> rusqlite::Result<ContextRecord> {
    let context_type: String = row.get("context_type")?;
    let keywords: String = row.get("keywords")?;
    let entities: String = row.get("entities")?;
    let merged_from: String = row.get("merged_from")?;
    let producer_versions: String = row.get("producer_versions")?;

    Ok(ContextRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        context_type: ContextType::parse(&context_type).unwrap_or(ContextType::Activity),
        title: row.get("title")?,
        summary: row.get("summary")?,
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        entities: serde_json::from_str::<Vec<Entity>>(&entities).unwrap_or_default(),
        location: row.get("location")?,
        window: TimeWindow::new(row.get("time_start")?, row.get("time_end")?),
        is_episode: row.get::<_, i64>("is_episode")? != 0,
        edited_by_user: row.get::<_, i64>("edited_by_user")? != 0,
        merge_count: row.get("merge_count")?,
        item_ids: Vec::new(), // filled from context_items
        merged_from: serde_json::from_str(&merged_from).unwrap_or_default(),
        embed_text: row.get("embed_text")?,
        producer_versions: serde_json::from_str::<HashMap<String, u32>>(&producer_versions)
            .unwrap_or_default(),
        day: row.get("day")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Database {
    // ---- items ----

    pub fn insert_item(&self, item: &SourceItem) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO items (id, user_id, item_type, storage_ref, content_type, filename,
                 content_hash, perceptual_hash, captured_at, tz_offset_minutes,
                 provider_captured_at, received_at, event_time, event_time_source,
                 event_time_confidence, status, canonical_item_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                item.id,
                item.user_id,
                item.item_type.as_str(),
                item.storage_ref,
                item.content_type,
                item.filename,
                item.content_hash,
                item.perceptual_hash,
                item.captured_at,
                item.tz_offset_minutes,
                item.provider_captured_at,
                item.received_at,
                item.event_time,
                item.event_time_source.map(|s| s.as_str()),
                item.event_time_confidence,
                item.status.as_str(),
                item.canonical_item_id,
                item.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_item(&self, id: &str) -> Result<Option<SourceItem>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT * FROM items WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], row_to_item)?;
        match rows.next() {
            Some(item) => Ok(Some(item?)),
            None => Ok(None),
        }
    }

    /// Exact-duplicate lookup scoped to one user
    pub fn find_item_by_content_hash(
        &self,
        user_id: &str,
        content_hash: &str,
    ) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM items
             WHERE user_id = ?1 AND content_hash = ?2 AND canonical_item_id IS NULL
             ORDER BY created_at ASC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![user_id, content_hash], |row| row.get(0))?;
        match rows.next() {
            Some(id) => Ok(Some(id?)),
            None => Ok(None),
        }
    }

    /// Rolling window of the user's most recent items carrying a perceptual hash
    pub fn recent_phash_items(
        &self,
        user_id: &str,
        exclude_item: &str,
        window: usize,
    ) -> Result<Vec<(String, i64)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, perceptual_hash FROM items
             WHERE user_id = ?1 AND id != ?2 AND perceptual_hash IS NOT NULL
               AND canonical_item_id IS NULL
             ORDER BY created_at DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![user_id, exclude_item, window as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn set_item_status(&self, id: &str, status: ItemStatus) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE items SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    pub fn set_item_event_time(
        &self,
        id: &str,
        event_time: i64,
        source: EventTimeSource,
        confidence: f64,
    ) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE items SET event_time = ?1, event_time_source = ?2,
                 event_time_confidence = ?3 WHERE id = ?4",
            params![event_time, source.as_str(), confidence, id],
        )?;
        Ok(())
    }

    pub fn set_item_perceptual_hash(&self, id: &str, phash: i64) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE items SET perceptual_hash = ?1 WHERE id = ?2",
            params![phash, id],
        )?;
        Ok(())
    }

    pub fn set_canonical_item(&self, id: &str, canonical_id: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE items SET canonical_item_id = ?1 WHERE id = ?2",
            params![canonical_id, id],
        )?;
        Ok(())
    }

    /// Items whose event time falls inside [start, end]
    pub fn items_in_range(&self, user_id: &str, start: i64, end: i64) -> Result<Vec<SourceItem>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM items
             WHERE user_id = ?1 AND event_time >= ?2 AND event_time <= ?3
             ORDER BY event_time ASC",
        )?;
        let rows = stmt.query_map(params![user_id, start, end], row_to_item)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Delete an item and cascade to its artifacts and sole-contributor contexts.
    /// Returns the ids of contexts removed so the caller can clear index entries.
    pub fn delete_item(&self, id: &str) -> Result<Vec<String>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        // Non-episode contexts whose only contributor is this item go away with it
        let removed: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT c.id FROM contexts c
                 JOIN context_items ci ON ci.context_id = c.id
                 WHERE ci.item_id = ?1 AND c.is_episode = 0
                   AND (SELECT COUNT(*) FROM context_items WHERE context_id = c.id) = 1",
            )?;
            let rows = stmt.query_map(params![id], |row| row.get(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };

        for context_id in &removed {
            tx.execute("DELETE FROM contexts WHERE id = ?1", params![context_id])?;
        }

        // Membership rows and artifacts cascade via foreign keys
        tx.execute("DELETE FROM items WHERE id = ?1", params![id])?;
        tx.commit()?;

        Ok(removed)
    }

    // ---- artifacts ----

    /// Insert an artifact row under the idempotency key.
    /// Returns false when an identical (item, kind, producer, version,
    /// fingerprint) row already exists; the racing write loses quietly.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_artifact(
        &self,
        item_id: &str,
        kind: &str,
        producer: &str,
        producer_version: u32,
        fingerprint: &str,
        status: StepStatus,
        payload: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<bool> {
        let conn = self.get_conn()?;
        let payload_json = payload
            .map(|p| serde_json::to_string(p).map_err(json_err("Failed to serialize artifact payload")))
            .transpose()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO artifacts
                 (item_id, kind, producer, producer_version, fingerprint, status, payload,
                  error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                item_id,
                kind,
                producer,
                producer_version as i64,
                fingerprint,
                status.as_str(),
                payload_json,
                error,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Cache lookup by the full idempotency key
    pub fn find_artifact(
        &self,
        item_id: &str,
        kind: &str,
        producer: &str,
        producer_version: u32,
        fingerprint: &str,
    ) -> Result<Option<DerivedArtifact>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM artifacts
             WHERE item_id = ?1 AND kind = ?2 AND producer = ?3
               AND producer_version = ?4 AND fingerprint = ?5",
        )?;
        let mut rows = stmt.query_map(
            params![item_id, kind, producer, producer_version as i64, fingerprint],
            row_to_artifact,
        )?;
        match rows.next() {
            Some(artifact) => Ok(Some(artifact?)),
            None => Ok(None),
        }
    }

    pub fn artifacts_for_item(&self, item_id: &str) -> Result<Vec<DerivedArtifact>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT * FROM artifacts WHERE item_id = ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![item_id], row_to_artifact)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn artifact_count(&self, item_id: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM artifacts WHERE item_id = ?1",
            params![item_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ---- contexts ----

    pub fn upsert_context(&self, context: &ContextRecord) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let keywords = serde_json::to_string(&context.keywords)
            .map_err(json_err("Failed to serialize keywords"))?;
        let entities = serde_json::to_string(&context.entities)
            .map_err(json_err("Failed to serialize entities"))?;
        let merged_from = serde_json::to_string(&context.merged_from)
            .map_err(json_err("Failed to serialize merged_from"))?;
        let producer_versions = serde_json::to_string(&context.producer_versions)
            .map_err(json_err("Failed to serialize producer_versions"))?;

        tx.execute(
            "INSERT INTO contexts (id, user_id, context_type, title, summary, keywords,
                 entities, location, time_start, time_end, is_episode, edited_by_user,
                 merge_count, merged_from, embed_text, producer_versions, day,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 summary = excluded.summary,
                 keywords = excluded.keywords,
                 entities = excluded.entities,
                 location = excluded.location,
                 time_start = excluded.time_start,
                 time_end = excluded.time_end,
                 edited_by_user = excluded.edited_by_user,
                 merge_count = excluded.merge_count,
                 merged_from = excluded.merged_from,
                 embed_text = excluded.embed_text,
                 producer_versions = excluded.producer_versions,
                 day = excluded.day,
                 updated_at = excluded.updated_at",
            params![
                context.id,
                context.user_id,
                context.context_type.as_str(),
                context.title,
                context.summary,
                keywords,
                entities,
                context.location,
                context.window.start,
                context.window.end,
                context.is_episode as i64,
                context.edited_by_user as i64,
                context.merge_count,
                merged_from,
                context.embed_text,
                producer_versions,
                context.day,
                context.created_at,
                context.updated_at,
            ],
        )?;

        tx.execute(
            "DELETE FROM context_items WHERE context_id = ?1",
            params![context.id],
        )?;
        for item_id in &context.item_ids {
            tx.execute(
                "INSERT OR IGNORE INTO context_items (context_id, item_id) VALUES (?1, ?2)",
                params![context.id, item_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_context(&self, id: &str) -> Result<Option<ContextRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT * FROM contexts WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], row_to_context)?;
        let context = match rows.next() {
            Some(context) => context?,
            None => return Ok(None),
        };
        drop(rows);
        drop(stmt);

        let mut context = context;
        context.item_ids = self.context_members(&conn, &context.id)?;
        Ok(Some(context))
    }

    pub fn get_contexts(&self, ids: &[String]) -> Result<Vec<ContextRecord>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(context) = self.get_context(id)? {
                out.push(context);
            }
        }
        Ok(out)
    }

    pub fn delete_context(&self, id: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM contexts WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn contexts_for_item(&self, item_id: &str) -> Result<Vec<ContextRecord>> {
        let conn = self.get_conn()?;
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT context_id FROM context_items WHERE item_id = ?1 ORDER BY context_id",
            )?;
            let rows = stmt.query_map(params![item_id], |row| row.get(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };
        drop(conn);
        self.get_contexts(&ids)
    }

    /// Episode contexts whose window comes within `gap_secs` of `anchor_ts`
    pub fn episode_candidates(
        &self,
        user_id: &str,
        anchor_ts: i64,
        gap_secs: i64,
        limit: usize,
    ) -> Result<Vec<ContextRecord>> {
        let conn = self.get_conn()?;
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM contexts
                 WHERE user_id = ?1 AND is_episode = 1 AND context_type = 'activity'
                   AND time_start <= ?2 AND time_end >= ?3
                 ORDER BY time_start DESC LIMIT ?4",
            )?;
            let rows = stmt.query_map(
                params![user_id, anchor_ts + gap_secs, anchor_ts - gap_secs, limit as i64],
                |row| row.get(0),
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };
        drop(conn);
        self.get_contexts(&ids)
    }

    /// Episodes whose window intersects [start, end]
    pub fn episodes_in_range(
        &self,
        user_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<ContextRecord>> {
        let conn = self.get_conn()?;
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM contexts
                 WHERE user_id = ?1 AND is_episode = 1
                   AND time_start <= ?2 AND time_end >= ?3
                 ORDER BY time_start ASC",
            )?;
            let rows = stmt.query_map(params![user_id, end, start], |row| row.get(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };
        drop(conn);
        self.get_contexts(&ids)
    }

    pub fn daily_summary(&self, user_id: &str, day: &str) -> Result<Option<ContextRecord>> {
        let conn = self.get_conn()?;
        let id: Option<String> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM contexts
                 WHERE user_id = ?1 AND context_type = 'daily_summary' AND day = ?2",
            )?;
            let mut rows = stmt.query_map(params![user_id, day], |row| row.get(0))?;
            match rows.next() {
                Some(id) => Some(id?),
                None => None,
            }
        };
        drop(conn);
        match id {
            Some(id) => self.get_context(&id),
            None => Ok(None),
        }
    }

    fn context_members(
        &self,
        conn: &rusqlite::Connection,
        context_id: &str,
    ) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT item_id FROM context_items WHERE context_id = ?1 ORDER BY item_id",
        )?;
        let rows = stmt.query_map(params![context_id], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_db() -> (TempDir, Database) {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("test.db")).unwrap();
        (temp, db)
    }

    fn test_item(id: &str, user: &str, hash: &str) -> SourceItem {
        SourceItem {
            id: id.to_string(),
            user_id: user.to_string(),
            item_type: ItemType::Photo,
            storage_ref: "ref".to_string(),
            content_type: "image/jpeg".to_string(),
            filename: Some("photo.jpg".to_string()),
            content_hash: hash.to_string(),
            perceptual_hash: None,
            captured_at: None,
            tz_offset_minutes: None,
            provider_captured_at: None,
            received_at: 1000,
            event_time: None,
            event_time_source: None,
            event_time_confidence: None,
            status: ItemStatus::Pending,
            canonical_item_id: None,
            created_at: 1000,
        }
    }

    fn test_context(id: &str, user: &str, items: &[&str]) -> ContextRecord {
        ContextRecord {
            id: id.to_string(),
            user_id: user.to_string(),
            context_type: ContextType::Activity,
            title: "Walk in the park".to_string(),
            summary: "An afternoon walk".to_string(),
            keywords: vec!["walk".to_string()],
            entities: vec![Entity::new("place", "Hyde Park", 0.8)],
            location: None,
            window: TimeWindow::new(2000, 2100),
            is_episode: false,
            edited_by_user: false,
            merge_count: 0,
            item_ids: items.iter().map(|s| s.to_string()).collect(),
            merged_from: vec![],
            embed_text: "Walk in the park".to_string(),
            producer_versions: HashMap::new(),
            day: None,
            created_at: 2000,
            updated_at: 2000,
        }
    }

    #[test]
    fn test_item_round_trip() {
        let (_tmp, db) = test_db();
        let item = test_item("i1", "u1", "hash1");
        db.insert_item(&item).unwrap();

        let loaded = db.get_item("i1").unwrap().unwrap();
        assert_eq!(loaded.user_id, "u1");
        assert_eq!(loaded.item_type, ItemType::Photo);
        assert_eq!(loaded.status, ItemStatus::Pending);
    }

    #[test]
    fn test_exact_duplicate_lookup() {
        let (_tmp, db) = test_db();
        db.insert_item(&test_item("i1", "u1", "samehash")).unwrap();
        db.insert_item(&test_item("i2", "u2", "samehash")).unwrap();

        // Scoped to user: u1's hash does not match u2's item
        assert_eq!(
            db.find_item_by_content_hash("u1", "samehash").unwrap(),
            Some("i1".to_string())
        );
        assert_eq!(db.find_item_by_content_hash("u3", "samehash").unwrap(), None);
    }

    #[test]
    fn test_artifact_insert_or_ignore() {
        let (_tmp, db) = test_db();
        db.insert_item(&test_item("i1", "u1", "h")).unwrap();

        let first = db
            .insert_artifact("i1", "metadata", "metadata", 1, "fp", StepStatus::Ok, None, None)
            .unwrap();
        let second = db
            .insert_artifact("i1", "metadata", "metadata", 1, "fp", StepStatus::Ok, None, None)
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(db.artifact_count("i1").unwrap(), 1);
    }

    #[test]
    fn test_artifact_version_bump_invalidates() {
        let (_tmp, db) = test_db();
        db.insert_item(&test_item("i1", "u1", "h")).unwrap();

        db.insert_artifact("i1", "extract", "extract", 1, "fp", StepStatus::Ok, None, None)
            .unwrap();
        assert!(db.find_artifact("i1", "extract", "extract", 2, "fp").unwrap().is_none());
        db.insert_artifact("i1", "extract", "extract", 2, "fp", StepStatus::Ok, None, None)
            .unwrap();
        assert_eq!(db.artifact_count("i1").unwrap(), 2);
    }

    #[test]
    fn test_context_upsert_and_membership() {
        let (_tmp, db) = test_db();
        db.insert_item(&test_item("i1", "u1", "h1")).unwrap();
        db.insert_item(&test_item("i2", "u1", "h2")).unwrap();

        let mut ctx = test_context("c1", "u1", &["i1"]);
        db.upsert_context(&ctx).unwrap();

        let loaded = db.get_context("c1").unwrap().unwrap();
        assert_eq!(loaded.item_ids, vec!["i1".to_string()]);
        assert_eq!(loaded.entities[0].name, "Hyde Park");

        // Upsert with a second member replaces membership
        ctx.item_ids.push("i2".to_string());
        ctx.title = "Long walk".to_string();
        db.upsert_context(&ctx).unwrap();

        let loaded = db.get_context("c1").unwrap().unwrap();
        assert_eq!(loaded.title, "Long walk");
        assert_eq!(loaded.item_ids.len(), 2);
    }

    #[test]
    fn test_episode_candidates_window() {
        let (_tmp, db) = test_db();
        db.insert_item(&test_item("i1", "u1", "h1")).unwrap();

        let mut ep = test_context("e1", "u1", &["i1"]);
        ep.is_episode = true;
        ep.window = TimeWindow::new(10_000, 11_000);
        db.upsert_context(&ep).unwrap();

        // Anchor exactly at gap distance from window end
        let found = db.episode_candidates("u1", 11_000 + 5400, 5400, 10).unwrap();
        assert_eq!(found.len(), 1);

        // One second beyond
        let found = db.episode_candidates("u1", 11_000 + 5401, 5400, 10).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_delete_item_cascades_sole_contexts() {
        let (_tmp, db) = test_db();
        db.insert_item(&test_item("i1", "u1", "h1")).unwrap();
        db.insert_item(&test_item("i2", "u1", "h2")).unwrap();

        db.insert_artifact("i1", "metadata", "metadata", 1, "fp", StepStatus::Ok, None, None)
            .unwrap();

        // c1 belongs only to i1, c2 is shared
        db.upsert_context(&test_context("c1", "u1", &["i1"])).unwrap();
        db.upsert_context(&test_context("c2", "u1", &["i1", "i2"])).unwrap();

        let removed = db.delete_item("i1").unwrap();
        assert_eq!(removed, vec!["c1".to_string()]);

        assert!(db.get_item("i1").unwrap().is_none());
        assert!(db.get_context("c1").unwrap().is_none());
        // Shared context survives, with membership trimmed by cascade
        let c2 = db.get_context("c2").unwrap().unwrap();
        assert_eq!(c2.item_ids, vec!["i2".to_string()]);
    }

    #[test]
    fn test_daily_summary_lookup() {
        let (_tmp, db) = test_db();
        db.insert_item(&test_item("i1", "u1", "h1")).unwrap();

        let mut daily = test_context("d1", "u1", &["i1"]);
        daily.context_type = ContextType::DailySummary;
        daily.day = Some("2026-02-02".to_string());
        db.upsert_context(&daily).unwrap();

        assert!(db.daily_summary("u1", "2026-02-02").unwrap().is_some());
        assert!(db.daily_summary("u1", "2026-02-03").unwrap().is_none());
    }
}
