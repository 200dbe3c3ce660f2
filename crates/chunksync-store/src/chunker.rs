//! Content-defined chunking.
//!
//! Boundaries come from a bup-style rolling checksum over a 64-byte window:
//! a chunk ends where the low bits of the checksum are all set, so equal
//! content produces equal chunks regardless of what precedes it. Chunks are
//! never shorter than `min_size` (except the final one) nor longer than
//! `max_size`.

use bytes::Bytes;
use chunksync_core::config::ChunkerConfig;

const WINDOW_SIZE: usize = 64;
const CHAR_OFFSET: u32 = 31;

struct Rollsum {
    s1: u32,
    s2: u32,
    window: [u8; WINDOW_SIZE],
    offset: usize,
}

impl Rollsum {
    fn new() -> Self {
        Self {
            s1: WINDOW_SIZE as u32 * CHAR_OFFSET,
            s2: WINDOW_SIZE as u32 * (WINDOW_SIZE as u32 - 1) * CHAR_OFFSET,
            window: [0; WINDOW_SIZE],
            offset: 0,
        }
    }

    fn roll(&mut self, byte: u8) {
        let drop = u32::from(self.window[self.offset]);
        let add = u32::from(byte);
        self.s1 = self.s1.wrapping_add(add.wrapping_sub(drop));
        self.s2 = self
            .s2
            .wrapping_add(self.s1.wrapping_sub(WINDOW_SIZE as u32 * (drop + CHAR_OFFSET)));
        self.window[self.offset] = byte;
        self.offset = (self.offset + 1) % WINDOW_SIZE;
    }

    fn at_boundary(&self, mask: u32) -> bool {
        self.s2 & mask == mask
    }
}

/// Streaming chunker. Feed bytes with [`push`](Chunker::push), collect the
/// tail with [`finish`](Chunker::finish).
pub struct Chunker {
    min_size: usize,
    max_size: usize,
    mask: u32,
    rollsum: Rollsum,
    pending: Vec<u8>,
}

impl Chunker {
    pub fn new(config: &ChunkerConfig) -> Self {
        let avg = config.avg_size.next_power_of_two().max(2);
        Self {
            min_size: config.min_size.max(1),
            max_size: config.max_size.max(config.min_size.max(1)),
            mask: (avg - 1) as u32,
            rollsum: Rollsum::new(),
            pending: Vec::with_capacity(avg),
        }
    }

    /// Feed `data`, returning every chunk completed by it.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        let mut cuts = Vec::new();
        for &byte in data {
            self.rollsum.roll(byte);
            self.pending.push(byte);
            let len = self.pending.len();
            if len >= self.max_size || (len >= self.min_size && self.rollsum.at_boundary(self.mask))
            {
                cuts.push(Bytes::from(std::mem::take(&mut self.pending)));
            }
        }
        cuts
    }

    /// The trailing partial chunk, if any bytes are buffered.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            None
        } else {
            Some(Bytes::from(std::mem::take(&mut self.pending)))
        }
    }
}
