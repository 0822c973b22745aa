//! Blackhole detection via BGP communities.
//!
//! Fires when an announcement carries any tag in the known blackhole set.
//! Withdrawals never fire; they carry no communities.

use serde_json::json;
use tokio::sync::mpsc;

use super::tables;
use crate::models::{prefix_length, BgpEvent, BgpUpdate, EventCategory, EventType, Severity};

pub struct BlackholeDetector {
    events: mpsc::Sender<BgpEvent>,
}

impl BlackholeDetector {
    pub fn new(events: mpsc::Sender<BgpEvent>) -> Self {
        Self { events }
    }

    pub fn process(&self, update: &BgpUpdate) {
        if !update.announcement {
            return;
        }

        if !tables::has_blackhole_community(&update.communities) {
            return;
        }

        let blackhole_communities = tables::blackhole_communities_in(&update.communities);
        let prefix_len = prefix_length(&update.prefix);
        let is_host_route = prefix_len == 32 || prefix_len == 128;

        // Host routes are routine DDoS defence; the coarser the prefix,
        // the weaker the evidence and the stranger the blackhole.
        let confidence = if is_host_route {
            0.95
        } else if prefix_len >= 24 {
            0.85
        } else {
            0.60
        };

        let severity = if !is_host_route && prefix_len < 16 {
            Severity::High
        } else {
            Severity::Medium
        };

        let event = BgpEvent::new(
            EventType::Blackhole,
            severity,
            EventCategory::Defense,
            update.origin_asn,
            update.prefix.clone(),
            json!({
                "signal": "blackhole_community",
                "communities": update.communities,
                "blackhole_communities": blackhole_communities,
                "as_path": update.as_path,
                "peer_asn": update.peer_asn,
                "collector": update.collector,
                "is_host_route": is_host_route,
                "confidence": confidence,
            }),
        );

        let _ = self.events.try_send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn announcement(prefix: &str, communities: Vec<&str>) -> BgpUpdate {
        BgpUpdate {
            timestamp: Utc::now(),
            peer_asn: 6939,
            prefix: prefix.to_string(),
            as_path: vec![6939, 3356, 13335],
            origin_asn: 13335,
            communities: communities.into_iter().map(String::from).collect(),
            announcement: true,
            collector: "rrc00".to_string(),
        }
    }

    #[test]
    fn rfc7999_community_fires() {
        let (tx, mut rx) = mpsc::channel(10);
        let detector = BlackholeDetector::new(tx);

        detector.process(&announcement("192.0.2.1/32", vec!["65535:666"]));

        let event = rx.try_recv().expect("expected blackhole event");
        assert_eq!(event.event_type, EventType::Blackhole);
        assert_eq!(event.category, EventCategory::Defense);
        assert_eq!(event.affected_asn, 13335);
        assert_eq!(event.affected_prefix, "192.0.2.1/32");
        assert_eq!(event.severity, Severity::Medium);
        assert_eq!(event.details["signal"], "blackhole_community");
        assert_eq!(event.details["is_host_route"], true);
        assert_eq!(event.details["confidence"], 0.95);
    }

    #[test]
    fn provider_community_with_nonstandard_suffix_fires() {
        let (tx, mut rx) = mpsc::channel(10);
        let detector = BlackholeDetector::new(tx);

        detector.process(&announcement("203.0.113.0/24", vec!["3356:9999"]));

        let event = rx.try_recv().expect("expected blackhole event");
        assert_eq!(
            event.details["blackhole_communities"],
            serde_json::json!(["3356:9999"])
        );
        assert_eq!(event.severity, Severity::Medium);
        assert_eq!(event.details["confidence"], 0.85);
    }

    #[test]
    fn unrelated_community_does_not_fire() {
        let (tx, mut rx) = mpsc::channel(10);
        let detector = BlackholeDetector::new(tx);

        detector.process(&announcement("8.8.8.0/24", vec!["6939:1234"]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn withdrawal_never_fires() {
        let (tx, mut rx) = mpsc::channel(10);
        let detector = BlackholeDetector::new(tx);

        let mut update = announcement("192.0.2.0/24", vec!["65535:666"]);
        update.announcement = false;

        detector.process(&update);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn coarse_blackhole_is_high_severity() {
        let (tx, mut rx) = mpsc::channel(10);
        let detector = BlackholeDetector::new(tx);

        detector.process(&announcement("10.0.0.0/8", vec!["65535:666"]));

        let event = rx.try_recv().expect("expected blackhole event");
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.details["confidence"], 0.6);
    }

    #[test]
    fn mid_size_prefix_is_medium_low_confidence() {
        let (tx, mut rx) = mpsc::channel(10);
        let detector = BlackholeDetector::new(tx);

        detector.process(&announcement("172.16.0.0/20", vec!["65535:666"]));

        let event = rx.try_recv().expect("expected blackhole event");
        assert_eq!(event.severity, Severity::Medium);
        assert_eq!(event.details["confidence"], 0.6);
    }

    #[test]
    fn ipv6_host_route_counts_as_host() {
        let (tx, mut rx) = mpsc::channel(10);
        let detector = BlackholeDetector::new(tx);

        detector.process(&announcement("2001:db8::1/128", vec!["65535:666"]));

        let event = rx.try_recv().expect("expected blackhole event");
        assert_eq!(event.details["is_host_route"], true);
        assert_eq!(event.details["confidence"], 0.95);
    }
}
