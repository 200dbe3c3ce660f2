//! Errors surfaced by the sync stages.
//!
//! Every error is terminal for the session. A stage that fails aborts the
//! channel it writes, and the stage reading that channel fails in turn with
//! an I/O error of kind `ConnectionAborted`. A stage that stops reading
//! makes its writer fail with `BrokenPipe`.

use std::io;

use chunksync_core::shuffle::ShuffleError;
use chunksync_core::{ChunkKey, WireError};
use chunksync_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Shuffle(#[from] ShuffleError),

    #[error("receiver requested placeholder slot {slot}")]
    SpuriousRequest { slot: usize },

    #[error("chunk {} not found", hex::encode(.0))]
    ChunkNotFound(ChunkKey),

    #[error("short chunk read: expected {expected} bytes, got {actual}")]
    ShortChunkRead { expected: u64, actual: u64 },

    #[error("chunk data does not hash to advertised key {}", hex::encode(.0))]
    ChunkMismatch(ChunkKey),

    #[error("real chunk follows placeholder at logical index {index}")]
    MisplacedPlaceholder { index: usize },

    #[error("chunk data continues past the last requested chunk")]
    TrailingData,

    #[error("wishlist stage ended before all slots were recorded")]
    WishlistMissing,

    #[error("builder {0} already ran")]
    AlreadyRan(&'static str),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("stage task failed: {0}")]
    Task(String),
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(key) => SyncError::ChunkNotFound(key),
            other => SyncError::Store(other),
        }
    }
}

impl SyncError {
    /// The channel error underneath, if this failure came from a byte stream.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            SyncError::Io(e) | SyncError::Wire(WireError::Io(e)) => Some(e),
            _ => None,
        }
    }

    /// True if this stage failed only because a peer stage went away first:
    /// the channel it reads was aborted, or the channel it writes lost its
    /// reader.
    pub fn is_peer_abort(&self) -> bool {
        self.io_error().is_some_and(|e| {
            matches!(
                e.kind(),
                io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
            )
        })
    }
}
