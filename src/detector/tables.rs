//! Reference tables used by the detectors: Tier-1 transit providers,
//! DDoS-scrubbing operators, and known blackhole communities.
//!
//! All three are initialised once from embedded data and never mutated.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

/// ASNs of known Tier-1 transit providers. A small AS appearing between
/// two of these is the leak signature.
pub static TIER1_ASNS: Lazy<HashMap<u32, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (174, "Cogent Communications"),
        (209, "Lumen (CenturyLink)"),
        (286, "KPN"),
        (701, "Verizon"),
        (1239, "Sprint"),
        (1299, "Telia"),
        (1828, "Unitas Global"),
        (2914, "NTT America"),
        (3257, "GTT"),
        (3320, "Deutsche Telekom"),
        (3356, "Lumen (Level3)"),
        (3491, "PCCW Global"),
        (5511, "Orange"),
        (6453, "Tata Communications"),
        (6461, "Zayo"),
        (6762, "Telecom Italia Sparkle"),
        (6830, "Liberty Global"),
        (6939, "Hurricane Electric"),
        (7018, "AT&T"),
        (12956, "Telefonica"),
    ])
});

/// ASNs of known DDoS mitigation / scrubbing operators. Traffic rerouted
/// through these is defensive, not a hijack.
pub static SCRUBBING_ASNS: Lazy<HashMap<u32, &'static str>> = Lazy::new(|| {
    HashMap::from([
        // Radware
        (198949, "Radware Ltd"),
        (48851, "Radware Ltd - Europe"),
        (25773, "Radware Inc - US"),
        (15823, "Radware Ltd - Israel"),
        // Akamai / Prolexic
        (32787, "Akamai Prolexic"),
        (20940, "Akamai Technologies"),
        (16625, "Akamai Technologies"),
        (21342, "Akamai Technologies"),
        (35994, "Akamai Technologies"),
        (23454, "Akamai Technologies"),
        // Cloudflare
        (13335, "Cloudflare Inc"),
        (209242, "Cloudflare Inc"),
        (394536, "Cloudflare Inc"),
        (395747, "Cloudflare Inc"),
        // Imperva / Incapsula
        (19551, "Incapsula Inc"),
        (62571, "Imperva Inc"),
        // Vercara / Neustar
        (19905, "UltraDDoS Protect"),
        (12008, "Vercara UltraDNS"),
        (397213, "Vercara LLC"),
        // DDoS-Guard
        (57724, "DDoS-Guard LTD"),
        (49612, "DDoS-Guard LTD"),
        // Qrator Labs
        (197068, "Qrator Labs"),
        // Voxility
        (3223, "Voxility LLP"),
        // Link11
        (34309, "Link11 GmbH"),
        // Sucuri
        (30148, "Sucuri"),
        // StackPath
        (20446, "StackPath ABC LLC"),
        (33438, "StackPath / Datum"),
        // Path Network
        (397031, "Path Network Inc"),
        // Cloud providers with DDoS protection
        (16509, "Amazon AWS Shield"),
        (14618, "Amazon"),
        (8075, "Microsoft Azure DDoS"),
        (396982, "Google Cloud Armor"),
        (15169, "Google"),
    ])
});

/// The well-known blackhole community from RFC 7999.
pub const RFC7999_BLACKHOLE: &str = "65535:666";

/// Known blackhole communities: RFC 7999 plus per-provider tags.
///
/// Several providers use suffixes other than :666 (Lumen 3356:9999,
/// Arelion 1299:999, PCCW 3491:999, KPN 286:66), so membership must be a
/// literal lookup. Matching on the suffix would both miss these and
/// false-positive on unrelated :666 communities.
pub static BLACKHOLE_COMMUNITIES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        RFC7999_BLACKHOLE,
        // Non-standard suffixes
        "3356:9999", // Lumen/Level3
        "1299:999",  // Arelion/Telia
        "3491:999",  // PCCW
        "286:66",    // KPN
        // Standard :666 suffix
        "2914:666",  // NTT
        "3257:666",  // GTT
        "7018:666",  // AT&T
        "6939:666",  // Hurricane Electric
        "3320:666",  // Deutsche Telekom
        "6453:666",  // Tata
        "6461:666",  // Zayo
        "701:666",   // Verizon
        "1239:666",  // Sprint
        "12956:666", // Telefonica
        "6762:666",  // Telecom Italia Sparkle
        "6830:666",  // Liberty Global
        "9002:666",  // RETN
        "20804:666", // Exatel
    ])
});

/// Whether an ASN is a known Tier-1 provider.
pub fn is_tier1(asn: u32) -> bool {
    TIER1_ASNS.contains_key(&asn)
}

/// Whether an ASN is a known scrubbing / DDoS mitigation operator.
pub fn is_scrubbing(asn: u32) -> bool {
    SCRUBBING_ASNS.contains_key(&asn)
}

/// Whether a community tag signals blackholing. Literal membership only.
pub fn is_blackhole_community(community: &str) -> bool {
    BLACKHOLE_COMMUNITIES.contains(community)
}

/// Whether any community in the list is a blackhole tag.
pub fn has_blackhole_community(communities: &[String]) -> bool {
    communities.iter().any(|c| is_blackhole_community(c))
}

/// Whether any ASN on the path belongs to a scrubbing operator.
pub fn has_scrubbing_center(as_path: &[u32]) -> bool {
    as_path.iter().any(|asn| is_scrubbing(*asn))
}

/// The subset of the update's communities that are known blackhole tags.
pub fn blackhole_communities_in(communities: &[String]) -> Vec<String> {
    communities
        .iter()
        .filter(|c| is_blackhole_community(c))
        .cloned()
        .collect()
}
