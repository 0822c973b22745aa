//! Data structures shared across the pipeline: parsed BGP updates and
//! detected anomaly events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A parsed BGP update from a RIS Live collector.
///
/// Withdrawals carry an empty path, no origin, and no communities.
#[derive(Debug, Clone, PartialEq)]
pub struct BgpUpdate {
    /// Collector-reported wall-clock time (sub-second precision).
    pub timestamp: DateTime<Utc>,
    /// ASN of the BGP peer that advertised the update.
    pub peer_asn: u32,
    /// Announced or withdrawn prefix in CIDR text form.
    pub prefix: String,
    /// AS path from peer to origin, nested AS_SETs flattened in order.
    pub as_path: Vec<u32>,
    /// Last element of the path; 0 when the path is empty.
    pub origin_asn: u32,
    /// Community tags in "ASN:value" text form.
    pub communities: Vec<String>,
    /// true for announcements, false for withdrawals.
    pub announcement: bool,
    /// Source collector identifier, e.g. "rrc00".
    pub collector: String,
}

/// Event severity levels, ordered so the writer can raise monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Parse a stored severity string; unknown values map to Low so a
    /// corrupt row can only be raised, never block an update.
    pub fn from_db(s: &str) -> Severity {
        match s {
            "medium" => Severity::Medium,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Low,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anomaly classes the detectors emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Hijack,
    Leak,
    Blackhole,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Hijack => "hijack",
            EventType::Leak => "leak",
            EventType::Blackhole => "blackhole",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad interpretation of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Attack,
    Defense,
    Misconfiguration,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Attack => "attack",
            EventCategory::Defense => "defense",
            EventCategory::Misconfiguration => "misconfiguration",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected BGP anomaly, produced by a detector and consumed by the sink.
#[derive(Debug, Clone, Serialize)]
pub struct BgpEvent {
    pub event_type: EventType,
    pub severity: Severity,
    pub category: EventCategory,
    /// Victim ASN for hijack/leak, origin ASN for blackhole.
    pub affected_asn: u32,
    pub affected_prefix: String,
    /// ISO 3166-1 alpha-2; empty until the sink fills it in.
    pub country_code: String,
    /// Free-form per-detector evidence (JSON object).
    pub details: serde_json::Value,
    pub detected_at: DateTime<Utc>,
    pub is_active: bool,
    pub is_cross_border: bool,
    pub attacker_country: String,
    pub victim_country: String,
}

impl BgpEvent {
    pub fn new(
        event_type: EventType,
        severity: Severity,
        category: EventCategory,
        affected_asn: u32,
        affected_prefix: String,
        details: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            severity,
            category,
            affected_asn,
            affected_prefix,
            country_code: String::new(),
            details,
            detected_at: Utc::now(),
            is_active: true,
            is_cross_border: false,
            attacker_country: String::new(),
            victim_country: String::new(),
        }
    }
}

/// Prefix length from a CIDR string; assumes a host route when no mask is
/// present, mirroring how collectors occasionally emit bare addresses.
pub fn prefix_length(prefix: &str) -> u32 {
    prefix
        .rsplit_once('/')
        .and_then(|(_, len)| len.parse().ok())
        .unwrap_or(32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::High.max(Severity::Medium), Severity::High);
    }

    #[test]
    fn severity_db_round_trip() {
        for sev in [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            assert_eq!(Severity::from_db(sev.as_str()), sev);
        }
        // Unknown strings become the floor, not an error
        assert_eq!(Severity::from_db("bogus"), Severity::Low);
    }

    #[test]
    fn event_type_display() {
        assert_eq!(EventType::Hijack.to_string(), "hijack");
        assert_eq!(EventType::Leak.to_string(), "leak");
        assert_eq!(EventType::Blackhole.to_string(), "blackhole");
    }

    #[test]
    fn prefix_length_parsing() {
        assert_eq!(prefix_length("1.2.3.0/24"), 24);
        assert_eq!(prefix_length("192.0.2.1/32"), 32);
        assert_eq!(prefix_length("2001:db8::/32"), 32);
        assert_eq!(prefix_length("2001:db8::1/128"), 128);
        // No mask: treated as a host route
        assert_eq!(prefix_length("192.0.2.1"), 32);
    }

    #[test]
    fn new_event_defaults() {
        let event = BgpEvent::new(
            EventType::Blackhole,
            Severity::Medium,
            EventCategory::Defense,
            13335,
            "1.1.1.0/24".to_string(),
            serde_json::json!({}),
        );
        assert!(event.is_active);
        assert!(event.country_code.is_empty());
        assert!(!event.is_cross_border);
    }
}
