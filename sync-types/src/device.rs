//! Device description exchanged once per sync session.

use serde::{Deserialize, Serialize};

use crate::DeviceId;

/// Device form factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Laptop or desktop browser.
    Desktop,
    /// Phone or tablet.
    Mobile,
}

/// The embedding space a device's vectors were produced in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSpace {
    /// Embedding model identifier (e.g. `all-MiniLM-L6-v2`).
    pub model: String,
    /// Vector dimension.
    pub dimension: u32,
    /// Inference backend (e.g. `wasm`, `webgpu`). Informational only.
    pub backend: String,
}

impl VectorSpace {
    /// Create a vector space description.
    pub fn new(model: impl Into<String>, dimension: u32, backend: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            dimension,
            backend: backend.into(),
        }
    }

    /// Whether vectors from `other` can be searched alongside vectors from `self`.
    ///
    /// Model and dimension must match. The backend only changes how the model
    /// is executed, not the space it produces.
    pub fn is_compatible_with(&self, other: &VectorSpace) -> bool {
        self.model == other.model && self.dimension == other.dimension
    }
}

/// Description of one device taking part in a sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Stable device identifier.
    pub device_id: DeviceId,
    /// Human-readable device name.
    pub name: String,
    /// Device form factor.
    pub device_class: DeviceClass,
    /// Operating system / platform string.
    pub platform: String,
    /// Browser or user agent.
    pub agent: String,
    /// Application / protocol version.
    pub app_version: String,
    /// Embedding space of this device's digests.
    pub vector_space: VectorSpace,
    /// Unix ms when this device was last seen.
    pub last_seen: u64,
    /// Unix ms when this device was paired, if ever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_at: Option<u64>,
}

impl DeviceInfo {
    /// Whether the two devices share a compatible vector space.
    pub fn is_vector_compatible(&self, other: &DeviceInfo) -> bool {
        self.vector_space.is_compatible_with(&other.vector_space)
    }
}
