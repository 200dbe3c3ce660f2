//! chunksync-store: content-addressed chunk storage.
//!
//! The protocol crate only talks to storage through [`ChunkStore`]. Two
//! backends are provided: [`MemoryStore`] for tests and short-lived peers,
//! [`DiskStore`] for a persistent cache.

pub mod chunker;
pub mod disk;
pub mod file;
pub mod memory;
pub mod store;

pub use chunker::Chunker;
pub use disk::DiskStore;
pub use file::{File, FileWriter};
pub use memory::MemoryStore;
pub use store::{ChunkStore, ChunkStoreExt, StoreError};
