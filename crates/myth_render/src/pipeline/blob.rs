//! Compiled pipeline blobs.
//!
//! An optional cache of backend-serialized pipelines keyed by
//! [`PipelineDescriptor::blob_key`](super::PipelineDescriptor::blob_key),
//! which does not depend on native handle values. The file carries a
//! format version and a stale file is ignored rather than reported.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use myth_core::errors::{GpuError, Result};

const BLOB_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct BlobFile {
    version: u32,
    entries: Vec<(u64, Vec<u8>)>,
}

#[derive(Debug, Default, Clone)]
pub struct PipelineBlobCache {
    blobs: FxHashMap<u64, Vec<u8>>,
}

impl PipelineBlobCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, hash: u64) -> Option<&[u8]> {
        self.blobs.get(&hash).map(Vec::as_slice)
    }

    pub fn insert(&mut self, hash: u64, blob: Vec<u8>) {
        self.blobs.insert(hash, blob);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Serializes the cache. Entries are sorted so equal caches produce
    /// equal bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut entries: Vec<(u64, Vec<u8>)> = self.blobs.iter().map(|(k, v)| (*k, v.clone())).collect();
        entries.sort_unstable_by_key(|(k, _)| *k);
        serde_json::to_vec(&BlobFile {
            version: BLOB_FORMAT_VERSION,
            entries,
        })
        .map_err(|e| GpuError::failed("cache", format!("pipeline blob serialization: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let file: BlobFile = serde_json::from_slice(bytes)
            .map_err(|e| GpuError::failed("cache", format!("pipeline blob parse: {e}")))?;
        if file.version != BLOB_FORMAT_VERSION {
            log::warn!(
                "[cache] ignoring pipeline blobs of format {} (expected {BLOB_FORMAT_VERSION})",
                file.version
            );
            return Ok(Self::default());
        }
        Ok(Self {
            blobs: file.entries.into_iter().collect(),
        })
    }
}
