//! Event-time resolution
//!
//! Computes one canonical `event_time` per item from a strict priority chain.
//! Everything temporal downstream (dedup windows, episode clustering, date
//! filters) keys off this single field, never off ingestion time.

use crate::pipeline::extract::MediaMetadata;
use crate::storage::models::{EventTimeSource, SourceItem};

/// Resolved event time with its provenance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedEventTime {
    pub event_time: i64,
    pub source: EventTimeSource,
    pub confidence: f64,
}

/// Resolve the canonical event time for an item.
///
/// Priority: embedded media metadata > provider metadata > client capture time
/// (tz-adjusted when the embedded time is timezone-naive) > server receive time.
pub fn resolve_event_time(item: &SourceItem, metadata: &MediaMetadata) -> ResolvedEventTime {
    if let Some(ts) = metadata.captured_at {
        return ResolvedEventTime {
            event_time: ts,
            source: EventTimeSource::MediaMetadata,
            confidence: 0.95,
        };
    }

    if let Some(ts) = item.provider_captured_at {
        return ResolvedEventTime {
            event_time: ts,
            source: EventTimeSource::Provider,
            confidence: 0.8,
        };
    }

    if let Some(ts) = item.captured_at {
        // Client timestamps are timezone-naive wall-clock readings; the
        // client-supplied offset shifts them onto UTC.
        let offset_secs = item.tz_offset_minutes.unwrap_or(0) as i64 * 60;
        return ResolvedEventTime {
            event_time: ts - offset_secs,
            source: EventTimeSource::Client,
            confidence: 0.6,
        };
    }

    ResolvedEventTime {
        event_time: item.received_at,
        source: EventTimeSource::ServerReceive,
        confidence: 0.3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{ItemStatus, ItemType};

    fn base_item() -> SourceItem {
        SourceItem {
            id: "i1".to_string(),
            user_id: "u1".to_string(),
            item_type: ItemType::Photo,
            storage_ref: "ref".to_string(),
            content_type: "image/jpeg".to_string(),
            filename: None,
            content_hash: "h".to_string(),
            perceptual_hash: None,
            captured_at: None,
            tz_offset_minutes: None,
            provider_captured_at: None,
            received_at: 10_000,
            event_time: None,
            event_time_source: None,
            event_time_confidence: None,
            status: ItemStatus::Processing,
            canonical_item_id: None,
            created_at: 10_000,
        }
    }

    #[test]
    fn test_media_metadata_wins() {
        let mut item = base_item();
        item.provider_captured_at = Some(2000);
        item.captured_at = Some(3000);

        let metadata = MediaMetadata {
            captured_at: Some(1000),
            ..Default::default()
        };
        let resolved = resolve_event_time(&item, &metadata);
        assert_eq!(resolved.event_time, 1000);
        assert_eq!(resolved.source, EventTimeSource::MediaMetadata);
        assert!(resolved.confidence > 0.9);
    }

    #[test]
    fn test_provider_beats_client() {
        let mut item = base_item();
        item.provider_captured_at = Some(2000);
        item.captured_at = Some(3000);

        let resolved = resolve_event_time(&item, &MediaMetadata::default());
        assert_eq!(resolved.event_time, 2000);
        assert_eq!(resolved.source, EventTimeSource::Provider);
    }

    #[test]
    fn test_client_time_adjusted_by_tz_offset() {
        let mut item = base_item();
        item.captured_at = Some(3600 * 12);
        item.tz_offset_minutes = Some(120); // UTC+2

        let resolved = resolve_event_time(&item, &MediaMetadata::default());
        assert_eq!(resolved.event_time, 3600 * 12 - 7200);
        assert_eq!(resolved.source, EventTimeSource::Client);
    }

    #[test]
    fn test_server_receive_fallback() {
        let item = base_item();
        let resolved = resolve_event_time(&item, &MediaMetadata::default());
        assert_eq!(resolved.event_time, 10_000);
        assert_eq!(resolved.source, EventTimeSource::ServerReceive);
        assert!(resolved.confidence < 0.5);
    }
}
