//! Batch - one chunk of a digest transfer.

use serde::{Deserialize, Serialize};

use crate::{BatchId, DeviceId, WireDigest};

/// One chunk of a larger digest transfer.
///
/// Every batch of a transfer carries the same `total_batches`; sequence
/// numbers are contiguous starting at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Position of this batch in the transfer.
    pub sequence: u32,
    /// Number of batches in the transfer.
    pub total_batches: u32,
    /// The digests carried by this batch.
    pub digests: Vec<WireDigest>,
    /// Device that produced the transfer.
    pub source_device_id: DeviceId,
    /// Unix ms when the batch was built.
    pub created_at: u64,
}

impl Batch {
    /// Whether this is the last batch of its transfer.
    pub fn is_last(&self) -> bool {
        self.sequence.checked_add(1) == Some(self.total_batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_batch(sequence: u32, total_batches: u32) -> Batch {
        Batch {
            batch_id: BatchId::new(),
            sequence,
            total_batches,
            digests: vec![],
            source_device_id: DeviceId::new("device-a"),
            created_at: 1_705_000_000_000,
        }
    }

    #[test]
    fn batch_json_uses_camel_case() {
        let json = serde_json::to_value(empty_batch(0, 1)).unwrap();
        assert!(json.get("batchId").is_some());
        assert!(json.get("totalBatches").is_some());
        assert_eq!(json["sourceDeviceId"], "device-a");
    }

    #[test]
    fn is_last_checks_sequence() {
        assert!(!empty_batch(0, 3).is_last());
        assert!(empty_batch(2, 3).is_last());
    }

    #[test]
    fn is_last_at_sequence_limit() {
        assert!(!empty_batch(u32::MAX, u32::MAX).is_last());
        assert!(empty_batch(u32::MAX - 1, u32::MAX).is_last());
    }
}
