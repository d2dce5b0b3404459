//! Context taxonomy and the structured output contract with the model collaborator
//!
//! Every memory unit extracted from media is typed against this fixed taxonomy.
//! Model output is validated here before anything downstream touches it.

use crate::error::{MemoraError, Result};
use serde::{Deserialize, Serialize};

/// Fixed taxonomy of context types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    Activity,
    Social,
    Location,
    Food,
    Emotion,
    Entity,
    Knowledge,
    DailySummary,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::Activity => "activity",
            ContextType::Social => "social",
            ContextType::Location => "location",
            ContextType::Food => "food",
            ContextType::Emotion => "emotion",
            ContextType::Entity => "entity",
            ContextType::Knowledge => "knowledge",
            ContextType::DailySummary => "daily_summary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "activity" => Some(ContextType::Activity),
            "social" => Some(ContextType::Social),
            "location" => Some(ContextType::Location),
            "food" => Some(ContextType::Food),
            "emotion" => Some(ContextType::Emotion),
            "entity" => Some(ContextType::Entity),
            "knowledge" => Some(ContextType::Knowledge),
            "daily_summary" => Some(ContextType::DailySummary),
            _ => None,
        }
    }

    /// All types the extractor is allowed to emit (daily summaries are derived, never extracted)
    pub fn extractable() -> &'static [ContextType] {
        &[
            ContextType::Activity,
            ContextType::Social,
            ContextType::Location,
            ContextType::Food,
            ContextType::Emotion,
            ContextType::Entity,
            ContextType::Knowledge,
        ]
    }
}

/// Named entity attached to a context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity category (person, place, organization, object, ...)
    pub entity_type: String,
    pub name: String,
    pub confidence: f32,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, name: impl Into<String>, confidence: f32) -> Self {
        Self {
            entity_type: entity_type.into(),
            name: name.into(),
            confidence,
        }
    }
}

/// Event time window in UTC seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn instant(ts: i64) -> Self {
        Self { start: ts, end: ts }
    }

    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    /// Union of two windows
    pub fn union(&self, other: &TimeWindow) -> TimeWindow {
        TimeWindow {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Shortest distance in seconds from a timestamp to this window (0 if inside)
    pub fn distance_to(&self, ts: i64) -> i64 {
        if ts < self.start {
            self.start - ts
        } else if ts > self.end {
            ts - self.end
        } else {
            0
        }
    }
}

/// One structured context as produced by the model collaborator
///
/// This is the wire contract: media (+ derived text) in, a list of these out.
/// Validation happens at the extraction boundary before storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedContext {
    pub context_type: ContextType,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_confidence")]
    pub importance: f32,
}

fn default_confidence() -> f32 {
    0.5
}

const MAX_KEYWORDS: usize = 32;
const MAX_ENTITIES: usize = 32;
const MAX_TITLE_LEN: usize = 512;

impl ExtractedContext {
    /// Validate a model payload against the taxonomy contract
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(MemoraError::InvalidContext("empty title".to_string()));
        }
        if self.title.len() > MAX_TITLE_LEN {
            return Err(MemoraError::InvalidContext(format!(
                "title too long: {} > {}",
                self.title.len(),
                MAX_TITLE_LEN
            )));
        }
        if self.context_type == ContextType::DailySummary {
            return Err(MemoraError::InvalidContext(
                "daily_summary is derived, not extractable".to_string(),
            ));
        }
        if self.keywords.len() > MAX_KEYWORDS {
            return Err(MemoraError::InvalidContext(format!(
                "too many keywords: {} > {}",
                self.keywords.len(),
                MAX_KEYWORDS
            )));
        }
        if self.entities.len() > MAX_ENTITIES {
            return Err(MemoraError::InvalidContext(format!(
                "too many entities: {} > {}",
                self.entities.len(),
                MAX_ENTITIES
            )));
        }
        for entity in &self.entities {
            if entity.name.trim().is_empty() {
                return Err(MemoraError::InvalidContext("entity with empty name".to_string()));
            }
            if !(0.0..=1.0).contains(&entity.confidence) {
                return Err(MemoraError::InvalidContext(format!(
                    "entity confidence out of range: {}",
                    entity.confidence
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence) || !(0.0..=1.0).contains(&self.importance) {
            return Err(MemoraError::InvalidContext(
                "confidence/importance out of range".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ctx_type: ContextType) -> ExtractedContext {
        ExtractedContext {
            context_type: ctx_type,
            title: "Dinner with friends".to_string(),
            summary: "Had pasta at a small restaurant".to_string(),
            keywords: vec!["dinner".to_string(), "pasta".to_string()],
            entities: vec![Entity::new("person", "Alice", 0.9)],
            location: Some("Rome".to_string()),
            confidence: 0.8,
            importance: 0.6,
        }
    }

    #[test]
    fn test_context_type_round_trip() {
        for t in ContextType::extractable() {
            assert_eq!(ContextType::parse(t.as_str()), Some(*t));
        }
        assert_eq!(
            ContextType::parse("daily_summary"),
            Some(ContextType::DailySummary)
        );
        assert_eq!(ContextType::parse("unknown"), None);
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample(ContextType::Social).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_title() {
        let mut ctx = sample(ContextType::Activity);
        ctx.title = "  ".to_string();
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_daily_summary() {
        let ctx = sample(ContextType::DailySummary);
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_confidence() {
        let mut ctx = sample(ContextType::Food);
        ctx.entities = vec![Entity::new("person", "Bob", 1.5)];
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn test_time_window_union_and_distance() {
        let a = TimeWindow::new(100, 200);
        let b = TimeWindow::new(150, 300);
        assert_eq!(a.union(&b), TimeWindow::new(100, 300));
        assert_eq!(a.distance_to(50), 50);
        assert_eq!(a.distance_to(150), 0);
        assert_eq!(a.distance_to(260), 60);
    }
}
