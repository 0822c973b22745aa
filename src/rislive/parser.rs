//! Decoder for RIS Live WebSocket frames.
//!
//! The wire format is JSON with a `{"type": ..., "data": ...}` envelope, and
//! several fields arrive in more than one shape: `peer_asn` may be a number
//! or a decimal string, `path` may mix plain ASNs with nested AS_SET arrays,
//! and `community` entries may be `[asn, value]` pairs or literal strings.
//! Each polymorphic field is modelled as an untagged enum and normalised
//! into the fixed [`BgpUpdate`] record.
//!
//! One frame yields at most one update: the first prefix of the first
//! announcement block, or failing that the first withdrawal. This mirrors
//! the upstream feed handling this codebase was built against; multi-prefix
//! announcements are deliberately sampled down to their first prefix.

use chrono::DateTime;
use serde::Deserialize;
use serde_json::value::RawValue;
use thiserror::Error;

use crate::models::BgpUpdate;

/// Errors from decoding a single frame. These never terminate the stream;
/// the client counts them and moves on.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid message envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("invalid update payload: {0}")]
    Payload(#[source] serde_json::Error),
}

/// Top-level RIS Live envelope.
#[derive(Debug, Deserialize)]
struct RisMessage<'a> {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(borrow, default)]
    data: Option<&'a RawValue>,
}

/// Payload of a `ris_message` frame. Every field is optional on the wire.
#[derive(Debug, Deserialize)]
struct RisUpdateData {
    #[serde(default)]
    timestamp: f64,
    #[serde(default)]
    peer_asn: Option<AsnValue>,
    #[serde(default)]
    path: Option<Vec<PathElement>>,
    #[serde(default)]
    announcements: Option<Vec<RisAnnouncement>>,
    #[serde(default)]
    withdrawals: Option<Vec<String>>,
    #[serde(default)]
    community: Option<Vec<CommunityValue>>,
}

#[derive(Debug, Deserialize)]
struct RisAnnouncement {
    #[serde(default)]
    prefixes: Vec<String>,
}

/// An ASN that may arrive as a JSON number or a decimal string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AsnValue {
    Number(u32),
    Text(String),
}

impl AsnValue {
    fn asn(&self) -> u32 {
        match self {
            AsnValue::Number(n) => *n,
            AsnValue::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

/// One element of an AS path: a plain ASN or a nested AS_SET group.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PathElement {
    Asn(u32),
    Set(Vec<u32>),
}

/// One community entry: a numeric `[asn, value]` pair or a literal tag.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommunityValue {
    Numbers(Vec<u32>),
    Literal(String),
}

/// Parse one text frame into a normalised update.
///
/// Returns `Ok(None)` for frames that are not BGP updates (subscription
/// acks, rrc lists, errors) and for updates that carry neither
/// announcements nor withdrawals.
pub fn parse_message(frame: &str, collector: &str) -> Result<Option<BgpUpdate>, ParseError> {
    let msg: RisMessage = serde_json::from_str(frame).map_err(ParseError::Envelope)?;

    if msg.kind != "ris_message" {
        return Ok(None);
    }

    let data = match msg.data {
        Some(data) => data,
        None => return Ok(None),
    };

    let update: RisUpdateData = serde_json::from_str(data.get()).map_err(ParseError::Payload)?;

    let peer_asn = update.peer_asn.as_ref().map(AsnValue::asn).unwrap_or(0);
    let as_path = flatten_path(update.path.as_deref().unwrap_or_default());
    let origin_asn = as_path.last().copied().unwrap_or(0);
    let communities = render_communities(update.community.as_deref().unwrap_or_default());
    let timestamp = float_timestamp(update.timestamp);

    if let Some(announcements) = &update.announcements {
        for announcement in announcements {
            if let Some(prefix) = announcement.prefixes.first() {
                return Ok(Some(BgpUpdate {
                    timestamp,
                    peer_asn,
                    prefix: prefix.clone(),
                    as_path,
                    origin_asn,
                    communities,
                    announcement: true,
                    collector: collector.to_string(),
                }));
            }
        }
    }

    if let Some(withdrawals) = &update.withdrawals {
        if let Some(prefix) = withdrawals.first() {
            return Ok(Some(BgpUpdate {
                timestamp,
                peer_asn,
                prefix: prefix.clone(),
                as_path: Vec::new(),
                origin_asn: 0,
                communities: Vec::new(),
                announcement: false,
                collector: collector.to_string(),
            }));
        }
    }

    Ok(None)
}

/// Flatten an AS path, expanding nested AS_SET groups in encounter order.
fn flatten_path(path: &[PathElement]) -> Vec<u32> {
    let mut flat = Vec::with_capacity(path.len());
    for element in path {
        match element {
            PathElement::Asn(asn) => flat.push(*asn),
            PathElement::Set(set) => flat.extend_from_slice(set),
        }
    }
    flat
}

/// Render community entries as "ASN:value" strings. Numeric entries that
/// are not exactly two elements are dropped rather than guessed at.
fn render_communities(communities: &[CommunityValue]) -> Vec<String> {
    let mut rendered = Vec::with_capacity(communities.len());
    for community in communities {
        match community {
            CommunityValue::Numbers(pair) if pair.len() == 2 => {
                rendered.push(format!("{}:{}", pair[0], pair[1]));
            }
            CommunityValue::Numbers(_) => {}
            CommunityValue::Literal(tag) => rendered.push(tag.clone()),
        }
    }
    rendered
}

/// Convert a fractional Unix timestamp to a UTC datetime.
fn float_timestamp(ts: f64) -> chrono::DateTime<chrono::Utc> {
    let secs = ts.trunc() as i64;
    let nanos = ((ts - ts.trunc()) * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or(DateTime::UNIX_EPOCH)
}
