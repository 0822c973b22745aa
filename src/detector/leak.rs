//! Route leak detection.
//!
//! The signature is a small AS appearing to provide transit between two
//! Tier-1 providers: `Tier1 -> X -> Tier1` with X neither Tier-1 nor a
//! scrubbing operator. The first matching window wins; at most one leak
//! event per update.

use serde_json::json;
use tokio::sync::mpsc;

use super::tables;
use crate::models::{BgpEvent, BgpUpdate, EventCategory, EventType, Severity};

pub struct LeakDetector {
    events: mpsc::Sender<BgpEvent>,
}

impl LeakDetector {
    pub fn new(events: mpsc::Sender<BgpEvent>) -> Self {
        Self { events }
    }

    pub fn process(&self, update: &BgpUpdate) {
        if !update.announcement || update.as_path.len() < 3 {
            return;
        }

        let (leaking_asn, upstream, downstream) = match find_leak_pattern(&update.as_path) {
            Some(window) => window,
            None => return,
        };

        let event = BgpEvent::new(
            EventType::Leak,
            Severity::High,
            EventCategory::Misconfiguration,
            leaking_asn,
            update.prefix.clone(),
            json!({
                "pattern": "tier1_transit_leak",
                "leaking_asn": leaking_asn,
                "upstream_tier1": upstream,
                "downstream_tier1": downstream,
                "as_path": update.as_path,
                "peer_asn": update.peer_asn,
                "collector": update.collector,
                "confidence": 0.85,
            }),
        );

        let _ = self.events.try_send(event);
    }
}

/// Scan three-element windows for the leak pattern. Returns
/// `(leaking_asn, upstream_tier1, downstream_tier1)` for the first match.
fn find_leak_pattern(as_path: &[u32]) -> Option<(u32, u32, u32)> {
    as_path.windows(3).find_map(|window| {
        let (upstream, middle, downstream) = (window[0], window[1], window[2]);
        if tables::is_tier1(upstream)
            && tables::is_tier1(downstream)
            && !tables::is_tier1(middle)
            && !tables::is_scrubbing(middle)
        {
            Some((middle, upstream, downstream))
        } else {
            None
        }
    })
}
