//! Digest - the unit of synced knowledge - and its transport projection.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeSet;

use crate::{DeviceId, VectorSpace};

/// Derive the stable digest identifier for a canonical URL.
///
/// Hex-encoded SHA-256 of the URL bytes. Two devices holding a digest for
/// the same URL always agree on its identifier.
pub fn digest_id_for_url(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Browsing context a digest was captured in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestContext {
    /// Browsing session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Tab identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    /// Window identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i64>,
    /// Referring URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    /// Time spent on the page, in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
}

/// The canonical record of one browsed item.
///
/// Timestamps are Unix milliseconds.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Digest {
    /// Stable identifier, derived from the URL.
    pub id: String,
    /// Canonical URL.
    pub url: String,
    /// Domain of the URL.
    pub domain: String,
    /// Page title.
    pub title: String,
    /// Generated summary.
    pub summary: String,
    /// Raw embedding bytes (little-endian f32s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<u8>>,
    /// Space the vector was produced in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_space: Option<VectorSpace>,
    /// Extracted keywords.
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    /// Extracted named entities.
    #[serde(default)]
    pub entities: BTreeSet<String>,
    /// Category label.
    pub category: String,
    /// Relevance score in `[0, 1]`.
    pub relevance_score: f64,
    /// Content quality score in `[0, 1]`.
    pub quality_score: f64,
    /// First time the item was seen.
    pub first_seen: u64,
    /// Last time the item was accessed.
    pub last_accessed: u64,
    /// Retention deadline, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Monotonic record version.
    #[serde(default)]
    pub version: u64,
    /// Number of visits.
    #[serde(default)]
    pub visit_count: u64,
    /// Whether the record has been synced at least once.
    #[serde(default)]
    pub synced: bool,
    /// Whether the record was captured in a private context.
    #[serde(default)]
    pub private: bool,
    /// Browsing context.
    #[serde(default)]
    pub context: DigestContext,
    /// Devices this record has been seen on.
    #[serde(default)]
    pub source_devices: BTreeSet<DeviceId>,
    /// Number of merges applied to this record.
    #[serde(default)]
    pub merge_count: u32,
    /// Last time the record was merged from a peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<u64>,
}

impl Digest {
    /// Create a digest for a URL with empty content and zero scores.
    pub fn new(url: impl Into<String>, domain: impl Into<String>, timestamp: u64) -> Self {
        let url = url.into();
        Self {
            id: digest_id_for_url(&url),
            url,
            domain: domain.into(),
            title: String::new(),
            summary: String::new(),
            vector: None,
            vector_space: None,
            keywords: BTreeSet::new(),
            entities: BTreeSet::new(),
            category: String::new(),
            relevance_score: 0.0,
            quality_score: 0.0,
            first_seen: timestamp,
            last_accessed: timestamp,
            expires_at: None,
            version: 1,
            visit_count: 1,
            synced: false,
            private: false,
            context: DigestContext::default(),
            source_devices: BTreeSet::new(),
            merge_count: 0,
            last_synced_at: None,
        }
    }
}

// Vectors are large; print their length only.
impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Digest")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("title", &self.title)
            .field(
                "vector",
                &self.vector.as_ref().map(|v| format!("[{} bytes]", v.len())),
            )
            .field("relevance_score", &self.relevance_score)
            .field("last_accessed", &self.last_accessed)
            .field("merge_count", &self.merge_count)
            .finish_non_exhaustive()
    }
}

/// The transport projection of a [`Digest`].
///
/// Identical except that the vector is base64 text and the derived
/// identifier is omitted (the receiver re-derives it from the URL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDigest {
    /// Canonical URL.
    pub url: String,
    /// Domain of the URL.
    pub domain: String,
    /// Page title.
    pub title: String,
    /// Generated summary.
    pub summary: String,
    /// Base64-encoded embedding bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<String>,
    /// Space the vector was produced in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_space: Option<VectorSpace>,
    /// Extracted keywords.
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    /// Extracted named entities.
    #[serde(default)]
    pub entities: BTreeSet<String>,
    /// Category label.
    pub category: String,
    /// Relevance score.
    pub relevance_score: f64,
    /// Content quality score.
    pub quality_score: f64,
    /// First time the item was seen.
    pub first_seen: u64,
    /// Last time the item was accessed.
    pub last_accessed: u64,
    /// Retention deadline, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Monotonic record version.
    #[serde(default)]
    pub version: u64,
    /// Number of visits.
    #[serde(default)]
    pub visit_count: u64,
    /// Synced flag.
    #[serde(default)]
    pub synced: bool,
    /// Private flag.
    #[serde(default)]
    pub private: bool,
    /// Browsing context.
    #[serde(default)]
    pub context: DigestContext,
    /// Devices this record has been seen on.
    #[serde(default)]
    pub source_devices: BTreeSet<DeviceId>,
    /// Number of merges applied to this record.
    #[serde(default)]
    pub merge_count: u32,
    /// Last time the record was merged from a peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<u64>,
}
