//! In-memory chunk store.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use chunksync_core::crypto::hash;
use chunksync_core::ChunkKey;

use crate::store::{ChunkStore, StoreError};

/// Chunks held in a concurrent map. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    chunks: Arc<DashMap<ChunkKey, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct chunks held.
    pub fn count(&self) -> usize {
        self.chunks.len()
    }

    /// Total payload bytes held.
    pub fn size(&self) -> u64 {
        self.chunks.iter().map(|e| e.value().len() as u64).sum()
    }

    /// Drop a chunk, returning whether it was present.
    pub fn remove(&self, key: &ChunkKey) -> bool {
        self.chunks.remove(key).is_some()
    }
}

impl ChunkStore for MemoryStore {
    fn contains(&self, key: &ChunkKey) -> Result<bool, StoreError> {
        Ok(self.chunks.contains_key(key))
    }

    fn get(&self, key: &ChunkKey) -> Result<Bytes, StoreError> {
        self.chunks
            .get(key)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound(*key))
    }

    fn put(&self, data: Bytes) -> Result<ChunkKey, StoreError> {
        let key = hash(&data);
        self.chunks.entry(key).or_insert(data);
        Ok(key)
    }
}
