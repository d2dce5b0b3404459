//! Typed rows for items, artifacts, and contexts

use crate::taxonomy::{ContextType, Entity, TimeWindow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Media type of an ingested item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Photo,
    Video,
    Audio,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Photo => "photo",
            ItemType::Video => "video",
            ItemType::Audio => "audio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(ItemType::Photo),
            "video" => Some(ItemType::Video),
            "audio" => Some(ItemType::Audio),
            _ => None,
        }
    }
}

/// Processing status of a source item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    /// All required steps succeeded but the index upsert could not be confirmed
    Degraded,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Degraded => "degraded",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ItemStatus::Pending),
            "processing" => Some(ItemStatus::Processing),
            "completed" => Some(ItemStatus::Completed),
            "degraded" => Some(ItemStatus::Degraded),
            "failed" => Some(ItemStatus::Failed),
            _ => None,
        }
    }
}

/// Which source the canonical event time was resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTimeSource {
    MediaMetadata,
    Provider,
    Client,
    ServerReceive,
}

impl EventTimeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTimeSource::MediaMetadata => "media_metadata",
            EventTimeSource::Provider => "provider",
            EventTimeSource::Client => "client",
            EventTimeSource::ServerReceive => "server_receive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "media_metadata" => Some(EventTimeSource::MediaMetadata),
            "provider" => Some(EventTimeSource::Provider),
            "client" => Some(EventTimeSource::Client),
            "server_receive" => Some(EventTimeSource::ServerReceive),
            _ => None,
        }
    }
}

/// One ingested media unit
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub id: String,
    pub user_id: String,
    pub item_type: ItemType,
    /// Content hash of the raw media in the media store
    pub storage_ref: String,
    pub content_type: String,
    pub filename: Option<String>,
    pub content_hash: String,
    /// 64-bit perceptual hash (images only)
    pub perceptual_hash: Option<i64>,
    /// Client-supplied capture time (UTC seconds), possibly timezone-naive
    pub captured_at: Option<i64>,
    pub tz_offset_minutes: Option<i32>,
    /// Provider/connector supplied capture time
    pub provider_captured_at: Option<i64>,
    pub received_at: i64,
    pub event_time: Option<i64>,
    pub event_time_source: Option<EventTimeSource>,
    pub event_time_confidence: Option<f64>,
    pub status: ItemStatus,
    /// Earlier item this one duplicates, when the dedup gate matched
    pub canonical_item_id: Option<String>,
    pub created_at: i64,
}

/// Per-step status recorded on each artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Skipped,
    Disabled,
    Error,
    Duplicate,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Ok => "ok",
            StepStatus::Skipped => "skipped",
            StepStatus::Disabled => "disabled",
            StepStatus::Error => "error",
            StepStatus::Duplicate => "duplicate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(StepStatus::Ok),
            "skipped" => Some(StepStatus::Skipped),
            "disabled" => Some(StepStatus::Disabled),
            "error" => Some(StepStatus::Error),
            "duplicate" => Some(StepStatus::Duplicate),
            _ => None,
        }
    }
}

/// Versioned output of one pipeline step for one item
///
/// (item_id, kind, producer, producer_version, fingerprint) is the idempotency
/// key: rerunning an unchanged step against unchanged input is a no-op.
#[derive(Debug, Clone)]
pub struct DerivedArtifact {
    pub id: i64,
    pub item_id: String,
    pub kind: String,
    pub producer: String,
    pub producer_version: u32,
    pub fingerprint: String,
    pub status: StepStatus,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: i64,
}

/// The retrievable memory unit
#[derive(Debug, Clone)]
pub struct ContextRecord {
    pub id: String,
    pub user_id: String,
    pub context_type: ContextType,
    pub title: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub entities: Vec<Entity>,
    pub location: Option<String>,
    pub window: TimeWindow,
    pub is_episode: bool,
    /// Sticky: once a user edits an episode summary, regeneration never overwrites it
    pub edited_by_user: bool,
    pub merge_count: i64,
    pub item_ids: Vec<String>,
    pub merged_from: Vec<String>,
    pub embed_text: String,
    pub producer_versions: HashMap<String, u32>,
    /// Calendar day key, set only for daily summaries
    pub day: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ContextRecord {
    /// Text that gets embedded and keyword-indexed for this context
    pub fn build_embed_text(&self) -> String {
        let mut parts = vec![self.title.clone(), self.summary.clone()];
        if !self.keywords.is_empty() {
            parts.push(self.keywords.join(" "));
        }
        if !self.entities.is_empty() {
            parts.push(
                self.entities
                    .iter()
                    .map(|e| e.name.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            );
        }
        if let Some(loc) = &self.location {
            parts.push(loc.clone());
        }
        parts.join("\n")
    }

    pub fn entity_names(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.name.to_lowercase()).collect()
    }
}
