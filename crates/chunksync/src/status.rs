//! Transfer progress reported by the sender's data phase.

/// Progress snapshot.
///
/// `bytes_to_transfer` starts at the file size and shrinks as chunks turn
/// out not to be requested. `bytes_transferred` only grows and never exceeds
/// the final `bytes_to_transfer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStatus {
    pub bytes_to_transfer: u64,
    pub bytes_transferred: u64,
}

impl TransferStatus {
    pub fn is_complete(&self) -> bool {
        self.bytes_transferred == self.bytes_to_transfer
    }

    /// Fraction done in `0.0..=1.0`. An empty transfer counts as done.
    pub fn fraction(&self) -> f64 {
        if self.bytes_to_transfer == 0 {
            1.0
        } else {
            self.bytes_transferred as f64 / self.bytes_to_transfer as f64
        }
    }
}

/// Invoked inline on the sending stage after every chunk. Keep it short.
pub type StatusCallback = Box<dyn FnMut(TransferStatus) + Send>;
