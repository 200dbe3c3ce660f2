//! The storage boundary used by the sync protocol.

use std::path::PathBuf;

use bytes::Bytes;
use chunksync_core::config::ChunkerConfig;
use chunksync_core::ChunkKey;

use crate::file::FileWriter;

/// Content-addressed chunk storage.
///
/// Implementations must be safe to call from several threads at once: the
/// receiver runs possession checks in parallel.
pub trait ChunkStore: Send + Sync {
    /// Possession check.
    fn contains(&self, key: &ChunkKey) -> Result<bool, StoreError>;

    /// Chunk bytes, or `StoreError::NotFound`.
    fn get(&self, key: &ChunkKey) -> Result<Bytes, StoreError>;

    /// Store `data` under its BLAKE3 key and return the key. Storing the
    /// same bytes twice is a no-op.
    fn put(&self, data: Bytes) -> Result<ChunkKey, StoreError>;
}

impl<S: ChunkStore + ?Sized> ChunkStore for std::sync::Arc<S> {
    fn contains(&self, key: &ChunkKey) -> Result<bool, StoreError> {
        (**self).contains(key)
    }

    fn get(&self, key: &ChunkKey) -> Result<Bytes, StoreError> {
        (**self).get(key)
    }

    fn put(&self, data: Bytes) -> Result<ChunkKey, StoreError> {
        (**self).put(data)
    }
}

/// Convenience constructors available on every store, including trait
/// objects.
pub trait ChunkStoreExt: ChunkStore {
    /// Open a writable blob named `name` using the default chunker settings.
    fn create(&self, name: &str) -> FileWriter<'_, Self> {
        FileWriter::new(self, name, ChunkerConfig::default())
    }

    fn create_with(&self, name: &str, chunker: ChunkerConfig) -> FileWriter<'_, Self> {
        FileWriter::new(self, name, chunker)
    }
}

impl<S: ChunkStore + ?Sized> ChunkStoreExt for S {}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("chunk {} not found", hex::encode(.0))]
    NotFound(ChunkKey),

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
