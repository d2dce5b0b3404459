//! Query understanding
//!
//! Lightweight heuristic classification ahead of retrieval: intent (is this a
//! memory question at all), shape (fact vs summary vs browse), entity
//! mentions, and a resolved date filter. Non-lookup intents never hit the
//! indexes.

pub mod dates;

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

pub use dates::parse_date_range;

/// What the user wants from the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// A question about the user's own past; runs retrieval
    MemoryLookup,
    Greeting,
    /// Questions about the system itself
    Meta,
    /// Too short or ambiguous to act on
    Clarification,
}

/// The shape of a memory lookup, which steers ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    /// Specific recall ("where did I park")
    Fact,
    /// Aggregation over a period ("what did I do last week")
    Summary,
    /// Listing/browsing ("show me photos of the beach")
    Browse,
    /// Comparison across periods or subjects
    Compare,
    /// Counting occurrences
    Count,
}

impl QueryShape {
    /// Broad shapes favor episodes and daily summaries over raw contexts
    pub fn is_broad(&self) -> bool {
        matches!(self, QueryShape::Summary | QueryShape::Browse | QueryShape::Compare)
    }

    /// Precise shapes benefit from cross-encoder reranking
    pub fn wants_rerank(&self) -> bool {
        matches!(self, QueryShape::Fact | QueryShape::Summary)
    }
}

/// Parsed query handed to the retriever
#[derive(Debug, Clone)]
pub struct UnderstoodQuery {
    pub raw: String,
    pub intent: QueryIntent,
    pub shape: QueryShape,
    /// Lowercased entity mentions pulled from capitalized and quoted spans
    pub entity_mentions: Vec<String>,
    /// Inclusive UTC event-time filter, when the query names a period
    pub date_range: Option<(i64, i64)>,
}

fn greeting_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(hi|hello|hey|yo|good\s+(morning|afternoon|evening))[\s!.,]*$")
            .unwrap()
    })
}

fn meta_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(what can you do|who are you|how do you work|help me use|what are you)\b")
            .unwrap()
    })
}

fn count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(how many|how often|how much|number of times|count)\b").unwrap())
}

fn compare_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(compare|versus|vs\.?|more than|less than|difference between)\b").unwrap())
}

fn summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(summarize|summary|recap|what did i do|how was my|tell me about my)\b")
            .unwrap()
    })
}

fn browse_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(show me|list|photos? of|pictures? of|videos? of|all the)\b").unwrap())
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)"|'([^']+)'"#).unwrap())
}

/// Classify a raw query. `tz_offset_minutes` localizes relative dates.
pub fn understand(text: &str, tz_offset_minutes: i32, now: DateTime<Utc>) -> UnderstoodQuery {
    let trimmed = text.trim();

    let intent = if trimmed.len() < 3 {
        QueryIntent::Clarification
    } else if greeting_re().is_match(trimmed) {
        QueryIntent::Greeting
    } else if meta_re().is_match(trimmed) {
        QueryIntent::Meta
    } else {
        QueryIntent::MemoryLookup
    };

    let shape = if count_re().is_match(trimmed) {
        QueryShape::Count
    } else if compare_re().is_match(trimmed) {
        QueryShape::Compare
    } else if summary_re().is_match(trimmed) {
        QueryShape::Summary
    } else if browse_re().is_match(trimmed) {
        QueryShape::Browse
    } else {
        QueryShape::Fact
    };

    let date_range = if intent == QueryIntent::MemoryLookup {
        dates::parse_date_range(trimmed, tz_offset_minutes, now)
    } else {
        None
    };

    UnderstoodQuery {
        raw: trimmed.to_string(),
        intent,
        shape,
        entity_mentions: extract_entity_mentions(trimmed),
        date_range,
    }
}

/// Pull candidate entity mentions: quoted spans, plus runs of capitalized
/// words that are not sentence-initial
fn extract_entity_mentions(text: &str) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();

    for caps in quoted_re().captures_iter(text) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
            push_mention(&mut mentions, m.as_str());
        }
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut run: Vec<&str> = Vec::new();
    for (i, word) in words.iter().enumerate() {
        let cleaned = word.trim_matches(|c: char| !c.is_alphanumeric());
        let capitalized = cleaned.chars().next().map(|c| c.is_uppercase()).unwrap_or(false);
        // First word of the query capitalizes regardless of being a name
        if capitalized && i > 0 && !is_stopword(cleaned) {
            run.push(cleaned);
        } else {
            if !run.is_empty() {
                push_mention(&mut mentions, &run.join(" "));
                run.clear();
            }
        }
    }
    if !run.is_empty() {
        push_mention(&mut mentions, &run.join(" "));
    }

    mentions
}

fn push_mention(mentions: &mut Vec<String>, raw: &str) {
    let lowered = raw.trim().to_lowercase();
    if !lowered.is_empty() && !mentions.contains(&lowered) {
        mentions.push(lowered);
    }
}

fn is_stopword(word: &str) -> bool {
    matches!(
        word.to_lowercase().as_str(),
        "i" | "monday"
            | "tuesday"
            | "wednesday"
            | "thursday"
            | "friday"
            | "saturday"
            | "sunday"
            | "january"
            | "february"
            | "march"
            | "april"
            | "may"
            | "june"
            | "july"
            | "august"
            | "september"
            | "october"
            | "november"
            | "december"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_770_033_600, 0).unwrap()
    }

    #[test]
    fn test_greeting_intent() {
        let q = understand("hey!", 0, now());
        assert_eq!(q.intent, QueryIntent::Greeting);
    }

    #[test]
    fn test_meta_intent() {
        let q = understand("what can you do?", 0, now());
        assert_eq!(q.intent, QueryIntent::Meta);
    }

    #[test]
    fn test_clarification_for_tiny_input() {
        let q = understand("?", 0, now());
        assert_eq!(q.intent, QueryIntent::Clarification);
    }

    #[test]
    fn test_fact_shape_default() {
        let q = understand("where did I leave my keys", 0, now());
        assert_eq!(q.intent, QueryIntent::MemoryLookup);
        assert_eq!(q.shape, QueryShape::Fact);
        assert!(q.shape.wants_rerank());
    }

    #[test]
    fn test_summary_shape_with_date() {
        let q = understand("what did I do last week?", 0, now());
        assert_eq!(q.shape, QueryShape::Summary);
        assert!(q.shape.is_broad());
        assert!(q.date_range.is_some());
    }

    #[test]
    fn test_count_shape() {
        let q = understand("how many times did I go running in January?", 0, now());
        assert_eq!(q.shape, QueryShape::Count);
        assert!(q.date_range.is_some());
    }

    #[test]
    fn test_browse_shape() {
        let q = understand("show me photos of the beach", 0, now());
        assert_eq!(q.shape, QueryShape::Browse);
    }

    #[test]
    fn test_entity_mentions() {
        let q = understand("when did I last see Alice Johnson at \"Cafe Luna\"?", 0, now());
        assert!(q.entity_mentions.contains(&"alice johnson".to_string()));
        assert!(q.entity_mentions.contains(&"cafe luna".to_string()));
    }

    #[test]
    fn test_month_names_not_entities() {
        let q = understand("what happened in December?", 0, now());
        assert!(q.entity_mentions.is_empty());
    }
}
