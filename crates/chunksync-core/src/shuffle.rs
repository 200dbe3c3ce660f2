//! Stream shuffler. Reorders an open-ended stream into a fixed number of
//! permuted slots.
//!
//! Items are `put` in logical order. Item `i` belongs in slot
//! `perm.forward(i)`. The shuffler holds items whose slot is not yet due and
//! releases them in ascending slot order through `pop`. Once `end` is called,
//! every slot that never received an item is released as the placeholder.
//!
//! Memory is bounded by how far ahead of the emission cursor the
//! permutation throws items, not by the domain size.
//!
//! Callers drive emission themselves:
//!
//! ```
//! use chunksync_core::permutation::SeededPermutation;
//! use chunksync_core::shuffle::StreamShuffler;
//!
//! let perm = SeededPermutation::from_mapping(vec![2, 0, 3, 1]).unwrap();
//! let mut shuffler = StreamShuffler::new(&perm, "pad");
//! let mut out = Vec::new();
//! for item in ["a", "b", "c"] {
//!     shuffler.put(item).unwrap();
//!     out.extend(shuffler.ready());
//! }
//! shuffler.end();
//! out.extend(shuffler.ready());
//! assert_eq!(out, vec!["b", "pad", "a", "c"]);
//! ```

use std::collections::BTreeMap;

use crate::permutation::Permutation;

pub struct StreamShuffler<P, T> {
    perm: P,
    placeholder: T,
    pending: BTreeMap<usize, T>,
    next_index: usize,
    next_slot: usize,
    ended: bool,
}

impl<P: Permutation, T: Clone> StreamShuffler<P, T> {
    pub fn new(perm: P, placeholder: T) -> Self {
        Self {
            perm,
            placeholder,
            pending: BTreeMap::new(),
            next_index: 0,
            next_slot: 0,
            ended: false,
        }
    }

    /// Accept the next logical item.
    pub fn put(&mut self, item: T) -> Result<(), ShuffleError> {
        if self.ended {
            return Err(ShuffleError::Ended);
        }
        if self.next_index >= self.perm.len() {
            return Err(ShuffleError::DomainExhausted {
                len: self.perm.len(),
            });
        }
        let slot = self.perm.forward(self.next_index);
        self.next_index += 1;
        self.pending.insert(slot, item);
        Ok(())
    }

    /// No more logical items will arrive. Unfilled slots become placeholders.
    pub fn end(&mut self) {
        self.ended = true;
    }

    /// Next item in slot order, if it is due.
    pub fn pop(&mut self) -> Option<T> {
        if self.next_slot >= self.perm.len() {
            return None;
        }
        let item = match self.pending.remove(&self.next_slot) {
            Some(item) => item,
            None if self.ended => self.placeholder.clone(),
            None => return None,
        };
        self.next_slot += 1;
        Some(item)
    }

    /// Drain every item that is currently due.
    pub fn ready(&mut self) -> Ready<'_, P, T> {
        Ready { shuffler: self }
    }

    /// Number of slots released.
    pub fn emitted(&self) -> usize {
        self.next_slot
    }

    /// Number of items held back waiting for their slot.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Total number of slots this shuffler releases.
    pub fn slot_count(&self) -> usize {
        self.perm.len()
    }

    /// True once every slot has been released.
    pub fn is_finished(&self) -> bool {
        self.ended && self.next_slot >= self.perm.len()
    }
}

/// Iterator returned by [`StreamShuffler::ready`].
pub struct Ready<'a, P, T> {
    shuffler: &'a mut StreamShuffler<P, T>,
}

impl<P: Permutation, T: Clone> Iterator for Ready<'_, P, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.shuffler.pop()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShuffleError {
    #[error("permutation domain of {len} slots exhausted")]
    DomainExhausted { len: usize },

    #[error("item put after end of stream")]
    Ended,
}
