//! chunksync-core: wire codecs, permutations, and the stream shuffler.
//! The store and protocol crates depend on this one.

pub mod bits;
pub mod config;
pub mod crypto;
pub mod permutation;
pub mod shuffle;
pub mod wire;

pub use permutation::{Inverted, Permutation, SeededPermutation};
pub use shuffle::StreamShuffler;
pub use wire::{ChunkEntry, ChunkKey, WireError, EMPTY_KEY};
