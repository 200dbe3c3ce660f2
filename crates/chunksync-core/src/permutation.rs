//! Permutations over the slot space.
//!
//! A permutation maps a logical index (position of a chunk in storage order)
//! to a slot (position in the shuffled wire order). Both peers must build the
//! same permutation; how they agree on its length and seed is outside this
//! crate.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A bijection over `0..len()`.
pub trait Permutation: Send + Sync {
    /// Size of the domain.
    fn len(&self) -> usize;

    /// Slot that logical index `index` is moved to.
    fn forward(&self, index: usize) -> usize;

    /// Logical index whose item lands in `slot`.
    fn inverse(&self, slot: usize) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P: Permutation + ?Sized> Permutation for &P {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn forward(&self, index: usize) -> usize {
        (**self).forward(index)
    }

    fn inverse(&self, slot: usize) -> usize {
        (**self).inverse(slot)
    }
}

impl<P: Permutation + ?Sized> Permutation for std::sync::Arc<P> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn forward(&self, index: usize) -> usize {
        (**self).forward(index)
    }

    fn inverse(&self, slot: usize) -> usize {
        (**self).inverse(slot)
    }
}

/// Table-backed permutation, usually derived from a shared seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeededPermutation {
    forward: Vec<usize>,
    inverse: Vec<usize>,
}

impl SeededPermutation {
    /// Fisher–Yates shuffle of `0..len` driven by ChaCha8 seeded with `seed`.
    ///
    /// Draws are made as u64 so the table is identical on 32- and 64-bit
    /// peers.
    pub fn new(len: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut forward: Vec<usize> = (0..len).collect();
        for i in (1..len).rev() {
            let j = rng.gen_range(0..=i as u64) as usize;
            forward.swap(i, j);
        }
        Self::from_table(forward)
    }

    pub fn identity(len: usize) -> Self {
        Self::from_table((0..len).collect())
    }

    /// Build from an explicit forward table, validating that it is a
    /// bijection.
    pub fn from_mapping(forward: Vec<usize>) -> Result<Self, PermutationError> {
        let len = forward.len();
        let mut seen = vec![false; len];
        for (index, &slot) in forward.iter().enumerate() {
            if slot >= len {
                return Err(PermutationError::OutOfRange { index, slot, len });
            }
            if std::mem::replace(&mut seen[slot], true) {
                return Err(PermutationError::DuplicateSlot(slot));
            }
        }
        Ok(Self::from_table(forward))
    }

    fn from_table(forward: Vec<usize>) -> Self {
        let mut inverse = vec![0; forward.len()];
        for (index, &slot) in forward.iter().enumerate() {
            inverse[slot] = index;
        }
        Self { forward, inverse }
    }
}

impl Permutation for SeededPermutation {
    fn len(&self) -> usize {
        self.forward.len()
    }

    fn forward(&self, index: usize) -> usize {
        self.forward[index]
    }

    fn inverse(&self, slot: usize) -> usize {
        self.inverse[slot]
    }
}

/// Swaps forward and inverse: turns slot order back into logical order.
#[derive(Debug, Clone, Copy)]
pub struct Inverted<P>(pub P);

impl<P: Permutation> Permutation for Inverted<P> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn forward(&self, index: usize) -> usize {
        self.0.inverse(index)
    }

    fn inverse(&self, slot: usize) -> usize {
        self.0.forward(slot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermutationError {
    #[error("index {index} maps to slot {slot}, outside 0..{len}")]
    OutOfRange { index: usize, slot: usize, len: usize },

    #[error("slot {0} is targeted more than once")]
    DuplicateSlot(usize),
}
