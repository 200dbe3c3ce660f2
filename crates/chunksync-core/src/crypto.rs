//! Content hashing.
//!
//! Chunk keys are BLAKE3 digests of the chunk bytes. The all-zero digest is
//! reserved for the placeholder; BLAKE3 will not produce it in practice.

use crate::wire::ChunkKey;

/// Hash a byte slice, returning the 32-byte BLAKE3 digest used as chunk key.
pub fn hash(data: &[u8]) -> ChunkKey {
    *blake3::hash(data).as_bytes()
}
