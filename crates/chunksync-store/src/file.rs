//! Files as ordered chunk lists.
//!
//! A [`File`] is an immutable manifest: a name plus the `(key, size)` of every
//! chunk in storage order. The bytes live in a [`ChunkStore`]. A
//! [`FileWriter`] is the writable blob that produces one.

use std::sync::Arc;

use bytes::Bytes;
use chunksync_core::config::ChunkerConfig;
use chunksync_core::ChunkEntry;

use crate::chunker::Chunker;
use crate::store::{ChunkStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    name: Arc<str>,
    chunks: Arc<[ChunkEntry]>,
    size: u64,
}

impl File {
    /// Seal a file from chunks that are already in storage.
    pub fn from_chunks(name: &str, chunks: Vec<ChunkEntry>) -> Self {
        let size = chunks.iter().map(|c| c.size).sum();
        Self {
            name: Arc::from(name),
            chunks: chunks.into(),
            size,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total byte length.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Chunks in storage order. Call again to restart.
    pub fn chunks(&self) -> std::slice::Iter<'_, ChunkEntry> {
        self.chunks.iter()
    }

    /// Concatenate every chunk's bytes.
    pub fn read_to_vec<S: ChunkStore + ?Sized>(&self, store: &S) -> Result<Vec<u8>, StoreError> {
        let mut out = Vec::with_capacity(self.size as usize);
        for chunk in self.chunks() {
            out.extend_from_slice(&store.get(&chunk.key)?);
        }
        Ok(out)
    }
}

/// Writable blob. Bytes are cut into chunks as they arrive and stored
/// immediately; [`close`](FileWriter::close) seals the manifest. Dropping an
/// unclosed writer discards the manifest.
pub struct FileWriter<'s, S: ?Sized> {
    store: &'s S,
    name: String,
    chunker: Chunker,
    chunks: Vec<ChunkEntry>,
}

impl<'s, S: ChunkStore + ?Sized> FileWriter<'s, S> {
    pub fn new(store: &'s S, name: &str, config: ChunkerConfig) -> Self {
        Self {
            store,
            name: name.to_string(),
            chunker: Chunker::new(&config),
            chunks: Vec::new(),
        }
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), StoreError> {
        for chunk in self.chunker.push(data) {
            self.store_chunk(chunk)?;
        }
        Ok(())
    }

    pub fn close(mut self) -> Result<File, StoreError> {
        if let Some(tail) = self.chunker.finish() {
            self.store_chunk(tail)?;
        }
        let file = File::from_chunks(&self.name, std::mem::take(&mut self.chunks));
        tracing::debug!(
            name = %self.name,
            chunks = file.chunk_count(),
            size = file.size(),
            "file sealed"
        );
        Ok(file)
    }

    fn store_chunk(&mut self, data: Bytes) -> Result<(), StoreError> {
        let size = data.len() as u64;
        let key = self.store.put(data)?;
        self.chunks.push(ChunkEntry::new(key, size));
        Ok(())
    }
}
