//! Wire codec: digest ↔ wire projection, vector base64, and batching.
//!
//! Vectors can be large (a 1536-dim f32 embedding is 6 KiB, some models
//! emit far more), so base64 conversion walks the buffer in bounded windows
//! instead of building one giant intermediate. Windows are aligned to whole
//! base64 groups, so the chunked output is identical to a one-shot encoding.

use base64::{engine::general_purpose::STANDARD, Engine};
use sync_types::{
    digest_id_for_url, now_millis, Batch, BatchId, DeviceId, Digest, ErrorKind, WireDigest,
};
use thiserror::Error;

/// Raw bytes per encode window (a multiple of 3, just under 32 KiB).
const ENCODE_WINDOW: usize = 32 * 1024 / 3 * 3;

/// Base64 characters per decode window (a multiple of 4, 32 KiB).
const DECODE_WINDOW: usize = 32 * 1024;

/// Errors from the wire codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Vector text is not valid base64
    #[error("invalid vector encoding: {0}")]
    InvalidVector(#[from] base64::DecodeError),

    /// A wire digest has no URL to derive its identifier from
    #[error("wire digest is missing its url")]
    MissingUrl,

    /// Batching was requested with a page size of zero
    #[error("page size must be at least 1")]
    InvalidPageSize,

    /// More batches than the wire format can number
    #[error("too many batches: {0}")]
    TooManyBatches(usize),

    /// Batch plaintext could not be encoded or decoded
    #[error("batch json: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Protocol
    }
}

/// Encode raw vector bytes as standard base64.
pub fn encode_vector(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for window in bytes.chunks(ENCODE_WINDOW) {
        STANDARD.encode_string(window, &mut out);
    }
    out
}

/// Decode standard base64 vector text back into raw bytes.
pub fn decode_vector(text: &str) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(text.len() / 4 * 3);
    for window in text.as_bytes().chunks(DECODE_WINDOW) {
        STANDARD.decode_vec(window, &mut out)?;
    }
    Ok(out)
}

/// Project a digest into its transport form.
pub fn to_wire(digest: &Digest) -> WireDigest {
    WireDigest {
        url: digest.url.clone(),
        domain: digest.domain.clone(),
        title: digest.title.clone(),
        summary: digest.summary.clone(),
        vector: digest.vector.as_deref().map(encode_vector),
        vector_space: digest.vector_space.clone(),
        keywords: digest.keywords.clone(),
        entities: digest.entities.clone(),
        category: digest.category.clone(),
        relevance_score: digest.relevance_score,
        quality_score: digest.quality_score,
        first_seen: digest.first_seen,
        last_accessed: digest.last_accessed,
        expires_at: digest.expires_at,
        version: digest.version,
        visit_count: digest.visit_count,
        synced: digest.synced,
        private: digest.private,
        context: digest.context.clone(),
        source_devices: digest.source_devices.clone(),
        merge_count: digest.merge_count,
        last_synced_at: digest.last_synced_at,
    }
}

/// Rebuild a digest from its transport form, re-deriving the identifier.
pub fn from_wire(wire: WireDigest) -> Result<Digest, CodecError> {
    if wire.url.is_empty() {
        return Err(CodecError::MissingUrl);
    }
    let vector = wire.vector.as_deref().map(decode_vector).transpose()?;
    Ok(Digest {
        id: digest_id_for_url(&wire.url),
        url: wire.url,
        domain: wire.domain,
        title: wire.title,
        summary: wire.summary,
        vector,
        vector_space: wire.vector_space,
        keywords: wire.keywords,
        entities: wire.entities,
        category: wire.category,
        relevance_score: wire.relevance_score,
        quality_score: wire.quality_score,
        first_seen: wire.first_seen,
        last_accessed: wire.last_accessed,
        expires_at: wire.expires_at,
        version: wire.version,
        visit_count: wire.visit_count,
        synced: wire.synced,
        private: wire.private,
        context: wire.context,
        source_devices: wire.source_devices,
        merge_count: wire.merge_count,
        last_synced_at: wire.last_synced_at,
    })
}

/// Split digests into fixed-size batches, preserving order.
///
/// N digests with page size B give `ceil(N / B)` batches; every batch of
/// the transfer carries the same `total_batches` and sequences run 0..total.
/// An empty input gives no batches.
pub fn chunk_into_batches(
    digests: &[Digest],
    page_size: usize,
    source: &DeviceId,
) -> Result<Vec<Batch>, CodecError> {
    if page_size == 0 {
        return Err(CodecError::InvalidPageSize);
    }
    let count = digests.len().div_ceil(page_size);
    let total_batches = u32::try_from(count).map_err(|_| CodecError::TooManyBatches(count))?;
    let created_at = now_millis();

    Ok(digests
        .chunks(page_size)
        .zip(0..total_batches)
        .map(|(page, sequence)| Batch {
            batch_id: BatchId::new(),
            sequence,
            total_batches,
            digests: page.iter().map(to_wire).collect(),
            source_device_id: source.clone(),
            created_at,
        })
        .collect())
}

/// Serialized size of a batch in bytes. Telemetry only.
pub fn estimate_size(batch: &Batch) -> usize {
    serde_json::to_vec(batch).map(|v| v.len()).unwrap_or(0)
}

/// Encode a batch as the JSON plaintext that gets encrypted.
pub fn encode_batch(batch: &Batch) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(batch)?)
}

/// Decode batch plaintext.
pub fn decode_batch(bytes: &[u8]) -> Result<Batch, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sync_types::VectorSpace;

    fn digest(n: usize) -> Digest {
        let mut d = Digest::new(
            format!("https://example.com/{}", n),
            "example.com",
            1_705_000_000_000,
        );
        d.title = format!("Page {}", n);
        d
    }

    // ===========================================
    // Vector encoding
    // ===========================================

    #[test]
    fn small_vector_matches_one_shot_base64() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(encode_vector(&bytes), STANDARD.encode(&bytes));
    }

    #[test]
    fn large_vector_spans_many_windows() {
        let bytes: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let text = encode_vector(&bytes);
        assert_eq!(text, STANDARD.encode(&bytes));
        assert_eq!(decode_vector(&text).unwrap(), bytes);
    }

    #[test]
    fn empty_vector() {
        assert_eq!(encode_vector(&[]), "");
        assert!(decode_vector("").unwrap().is_empty());
    }

    #[test]
    fn invalid_vector_text() {
        assert!(matches!(
            decode_vector("@@@@"),
            Err(CodecError::InvalidVector(_))
        ));
    }

    // ===========================================
    // Wire projection
    // ===========================================

    #[test]
    fn wire_roundtrip_preserves_vector_bytes() {
        let mut d = digest(1);
        let floats = [0.25f32, -1.5, 3.0, f32::MIN_POSITIVE];
        d.vector = Some(floats.iter().flat_map(|f| f.to_le_bytes()).collect());
        d.vector_space = Some(VectorSpace::new("minilm", 4, "wasm"));
        d.keywords.insert("rust".into());

        let restored = from_wire(to_wire(&d)).unwrap();
        assert_eq!(restored, d);
        assert_eq!(restored.vector, d.vector);
    }

    #[test]
    fn from_wire_rederives_id() {
        let d = digest(7);
        let mut wire = to_wire(&d);
        wire.url = "https://other.example.com/".into();
        let restored = from_wire(wire).unwrap();
        assert_eq!(restored.id, digest_id_for_url("https://other.example.com/"));
    }

    #[test]
    fn from_wire_without_url_fails() {
        let mut wire = to_wire(&digest(1));
        wire.url.clear();
        assert!(matches!(from_wire(wire), Err(CodecError::MissingUrl)));
    }

    // ===========================================
    // Batching
    // ===========================================

    #[test]
    fn chunk_250_by_100() {
        let digests: Vec<Digest> = (0..250).map(digest).collect();
        let source = DeviceId::new("device-a");
        let batches = chunk_into_batches(&digests, 100, &source).unwrap();

        let sizes: Vec<usize> = batches.iter().map(|b| b.digests.len()).collect();
        let sequences: Vec<u32> = batches.iter().map(|b| b.sequence).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(batches.iter().all(|b| b.total_batches == 3));
        assert!(batches.iter().all(|b| b.source_device_id == source));
    }

    #[test]
    fn chunk_preserves_order() {
        let digests: Vec<Digest> = (0..5).map(digest).collect();
        let batches = chunk_into_batches(&digests, 2, &DeviceId::new("d")).unwrap();
        let urls: Vec<String> = batches
            .iter()
            .flat_map(|b| b.digests.iter().map(|w| w.url.clone()))
            .collect();
        let expected: Vec<String> = digests.iter().map(|d| d.url.clone()).collect();
        assert_eq!(urls, expected);
    }

    #[test]
    fn exact_multiple_has_full_last_batch() {
        let digests: Vec<Digest> = (0..200).map(digest).collect();
        let batches = chunk_into_batches(&digests, 100, &DeviceId::new("d")).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].digests.len(), 100);
    }

    #[test]
    fn batch_ids_are_distinct() {
        let digests: Vec<Digest> = (0..3).map(digest).collect();
        let batches = chunk_into_batches(&digests, 1, &DeviceId::new("d")).unwrap();
        assert_ne!(batches[0].batch_id, batches[1].batch_id);
        assert_ne!(batches[1].batch_id, batches[2].batch_id);
    }

    #[test]
    fn empty_input_gives_no_batches() {
        let batches = chunk_into_batches(&[], 50, &DeviceId::new("d")).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn zero_page_size_is_an_error() {
        let digests = vec![digest(0)];
        assert!(matches!(
            chunk_into_batches(&digests, 0, &DeviceId::new("d")),
            Err(CodecError::InvalidPageSize)
        ));
    }

    #[test]
    fn batch_plaintext_roundtrip() {
        let digests: Vec<Digest> = (0..3).map(digest).collect();
        let batch = chunk_into_batches(&digests, 10, &DeviceId::new("d"))
            .unwrap()
            .remove(0);
        let bytes = encode_batch(&batch).unwrap();
        assert_eq!(estimate_size(&batch), bytes.len());
        assert_eq!(decode_batch(&bytes).unwrap(), batch);
    }

    #[test]
    fn decode_batch_rejects_garbage() {
        assert!(matches!(decode_batch(b"{oops"), Err(CodecError::Json(_))));
    }

    proptest! {
        #[test]
        fn vector_bytes_survive_encoding(bytes in proptest::collection::vec(any::<u8>(), 0..100_000)) {
            let text = encode_vector(&bytes);
            prop_assert_eq!(decode_vector(&text).unwrap(), bytes);
        }

        #[test]
        fn batch_count_is_ceiling(n in 0usize..500, page in 1usize..120) {
            let digests: Vec<Digest> = (0..n).map(digest).collect();
            let batches = chunk_into_batches(&digests, page, &DeviceId::new("d")).unwrap();
            prop_assert_eq!(batches.len(), n.div_ceil(page));
            let total: usize = batches.iter().map(|b| b.digests.len()).sum();
            prop_assert_eq!(total, n);
        }
    }
}
