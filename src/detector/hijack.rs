//! Origin hijack detection.
//!
//! Tracks the first-seen origin per prefix and flags announcements whose
//! origin diverges from it, unless the divergence was already observed
//! (MOAS) or the path runs through a scrubbing operator.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use super::store::OriginStore;
use super::tables;
use crate::models::{prefix_length, BgpEvent, BgpUpdate, EventCategory, EventType, Severity};

pub struct HijackDetector {
    events: mpsc::Sender<BgpEvent>,
    store: Arc<OriginStore>,
}

impl HijackDetector {
    pub fn new(events: mpsc::Sender<BgpEvent>, store: Arc<OriginStore>) -> Self {
        Self { events, store }
    }

    pub async fn process(&self, update: &BgpUpdate) {
        if !update.announcement || update.origin_asn == 0 {
            return;
        }

        // Traffic through a scrubbing centre is defensive rerouting
        if tables::has_scrubbing_center(&update.as_path) {
            return;
        }

        let known_origin = match self.store.known_origin(&update.prefix).await {
            Some(origin) => origin,
            None => {
                // First sighting: learn and move on
                self.store
                    .record_origin(&update.prefix, update.origin_asn)
                    .await;
                return;
            }
        };

        if known_origin == update.origin_asn {
            return;
        }

        // Previously observed divergence, treated as legitimate MOAS
        if self
            .store
            .is_known_moas(&update.prefix, update.origin_asn)
            .await
        {
            return;
        }

        let tier1_involved = tables::is_tier1(known_origin) || tables::is_tier1(update.origin_asn);
        let large_prefix = prefix_length(&update.prefix) < 16;

        let mut flags = vec!["origin_change"];
        let (severity, confidence) = if tier1_involved {
            flags.push("tier1_involved");
            (Severity::Critical, 0.9)
        } else if large_prefix {
            flags.push("large_prefix");
            (Severity::High, 0.8)
        } else {
            (Severity::Medium, 0.7)
        };

        let event = BgpEvent::new(
            EventType::Hijack,
            severity,
            EventCategory::Attack,
            known_origin,
            update.prefix.clone(),
            json!({
                "original_origin": known_origin,
                "hijacking_asn": update.origin_asn,
                "as_path": update.as_path,
                "peer_asn": update.peer_asn,
                "collector": update.collector,
                "flags": flags,
                "confidence": confidence,
            }),
        );

        let _ = self.events.try_send(event);

        // Remember the divergence; the known origin itself is never
        // overwritten, so it keeps anchoring future comparisons until
        // its store entry expires.
        self.store.add_moas(&update.prefix, update.origin_asn).await;
    }
}
