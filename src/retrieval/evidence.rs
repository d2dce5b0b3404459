//! Evidence set assembly
//!
//! After ranking, raw contexts that are fully covered by a selected episode
//! (their items are a subset of the episode's) add nothing and get dropped,
//! then the set is trimmed to the evidence budget.

use crate::retrieval::ScoredContext;

/// Drop subsumed raw contexts, dedup by id, and trim to `max_evidence`
pub fn assemble_evidence(mut candidates: Vec<ScoredContext>, max_evidence: usize) -> Vec<ScoredContext> {
    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.context.id.clone()));

    let episode_item_sets: Vec<std::collections::HashSet<String>> = candidates
        .iter()
        .filter(|c| c.context.is_episode)
        .map(|c| c.context.item_ids.iter().cloned().collect())
        .collect();

    candidates.retain(|c| {
        if c.context.is_episode || c.context.item_ids.is_empty() {
            return true;
        }
        let subsumed = episode_item_sets
            .iter()
            .any(|items| c.context.item_ids.iter().all(|id| items.contains(id)));
        !subsumed
    });

    candidates.truncate(max_evidence);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::ContextRecord;
    use crate::taxonomy::{ContextType, TimeWindow};
    use std::collections::HashMap;

    fn scored(id: &str, is_episode: bool, items: &[&str], score: f32) -> ScoredContext {
        ScoredContext {
            context: ContextRecord {
                id: id.to_string(),
                user_id: "u1".to_string(),
                context_type: ContextType::Activity,
                title: id.to_string(),
                summary: String::new(),
                keywords: vec![],
                entities: vec![],
                location: None,
                window: TimeWindow::instant(0),
                is_episode,
                edited_by_user: false,
                merge_count: 0,
                item_ids: items.iter().map(|s| s.to_string()).collect(),
                merged_from: vec![],
                embed_text: String::new(),
                producer_versions: HashMap::new(),
                day: None,
                created_at: 0,
                updated_at: 0,
            },
            score,
            snippet: None,
        }
    }

    #[test]
    fn test_subsumed_raw_context_dropped() {
        let evidence = assemble_evidence(
            vec![
                scored("ep", true, &["i1", "i2"], 0.9),
                scored("raw-covered", false, &["i1"], 0.8),
                scored("raw-other", false, &["i9"], 0.7),
            ],
            8,
        );
        let ids: Vec<&str> = evidence.iter().map(|c| c.context.id.as_str()).collect();
        assert_eq!(ids, vec!["ep", "raw-other"]);
    }

    #[test]
    fn test_partial_overlap_survives() {
        let evidence = assemble_evidence(
            vec![
                scored("ep", true, &["i1"], 0.9),
                scored("raw", false, &["i1", "i2"], 0.8),
            ],
            8,
        );
        assert_eq!(evidence.len(), 2);
    }

    #[test]
    fn test_trim_to_budget() {
        let candidates = (0..12)
            .map(|i| scored(&format!("c{}", i), false, &[], 1.0 - i as f32 * 0.01))
            .collect();
        let evidence = assemble_evidence(candidates, 8);
        assert_eq!(evidence.len(), 8);
        assert_eq!(evidence[0].context.id, "c0");
    }

    #[test]
    fn test_duplicates_removed() {
        let evidence = assemble_evidence(
            vec![scored("c1", false, &[], 0.9), scored("c1", false, &[], 0.8)],
            8,
        );
        assert_eq!(evidence.len(), 1);
    }
}
