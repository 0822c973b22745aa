//! BGP anomaly detection: blackhole, hijack, and leak detectors plus
//! their shared reference tables and the origin-tracking store.

pub mod blackhole;
pub mod hijack;
pub mod leak;
pub mod store;
pub mod tables;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::models::{BgpEvent, BgpUpdate};
pub use blackhole::BlackholeDetector;
pub use hijack::HijackDetector;
pub use leak::LeakDetector;
pub use store::OriginStore;

/// The three detectors a worker runs over every update, in order.
pub struct DetectorSet {
    blackhole: BlackholeDetector,
    hijack: HijackDetector,
    leak: LeakDetector,
}

impl DetectorSet {
    pub fn new(events: mpsc::Sender<BgpEvent>, store: Arc<OriginStore>) -> Self {
        Self {
            blackhole: BlackholeDetector::new(events.clone()),
            hijack: HijackDetector::new(events.clone(), store),
            leak: LeakDetector::new(events),
        }
    }

    pub async fn process(&self, update: &BgpUpdate) {
        self.blackhole.process(update);
        self.hijack.process(update).await;
        self.leak.process(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn one_update_can_fire_multiple_detectors() {
        let (tx, mut rx) = mpsc::channel(10);
        let store = Arc::new(OriginStore::new(None));
        let detectors = DetectorSet::new(tx, store);

        // Establish an origin for the prefix first
        detectors
            .process(&BgpUpdate {
                timestamp: Utc::now(),
                peer_asn: 6939,
                prefix: "203.0.113.0/24".to_string(),
                as_path: vec![6939, 64500],
                origin_asn: 64500,
                communities: Vec::new(),
                announcement: true,
                collector: "rrc00".to_string(),
            })
            .await;
        assert!(rx.try_recv().is_err());

        // Blackholed, origin-changed, and leaking all at once
        detectors
            .process(&BgpUpdate {
                timestamp: Utc::now(),
                peer_asn: 6939,
                prefix: "203.0.113.0/24".to_string(),
                as_path: vec![6939, 65001, 3356, 64501],
                origin_asn: 64501,
                communities: vec!["65535:666".to_string()],
                announcement: true,
                collector: "rrc00".to_string(),
            })
            .await;

        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type);
        }
        assert_eq!(
            types,
            vec![
                crate::models::EventType::Blackhole,
                crate::models::EventType::Hijack,
                crate::models::EventType::Leak,
            ]
        );
    }
}
