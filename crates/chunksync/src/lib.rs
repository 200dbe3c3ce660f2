//! chunksync: delta synchronization of content-addressed files.
//!
//! A sync runs in three phases over three independent byte streams:
//!
//!   1. sender → receiver: the file's chunk hashes, shuffled and padded to a
//!      fixed slot count ([`write_chunk_hashes`])
//!   2. receiver → sender: one wishlist bit per slot
//!      ([`Builder::write_wishlist`])
//!   3. sender → receiver: the requested chunks' bytes ([`write_chunk_data`]),
//!      reassembled by [`Builder::reconstruct`]
//!
//! The stages are plain async functions over `AsyncRead`/`AsyncWrite`, so any
//! transport works. [`session::sync_local`] wires them together in-process
//! over [`pipe`]s.

pub mod builder;
pub mod error;
pub mod pipe;
pub mod send;
pub mod session;
pub mod status;

pub use builder::{Builder, WishlistSummary};
pub use error::SyncError;
pub use pipe::{pipe, PipeReader, PipeWriter};
pub use send::{write_chunk_data, write_chunk_hashes, WishlistWalk};
pub use session::{sync_local, SyncReport};
pub use status::{StatusCallback, TransferStatus};
