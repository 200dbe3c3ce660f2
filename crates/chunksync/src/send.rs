//! Sender stages: advertise chunk hashes, then deliver requested chunks.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use chunksync_core::bits::BitReader;
use chunksync_core::wire::{write_chunk_entry, write_varint};
use chunksync_core::{ChunkEntry, Permutation, StreamShuffler};
use chunksync_store::{ChunkStore, File};

use crate::error::SyncError;
use crate::status::TransferStatus;

/// Phase 1: write one `key || varint(size)` entry per slot, in slot order.
///
/// Slots no chunk maps to carry the placeholder entry. Fails with
/// `DomainExhausted` if the file has more chunks than `perm` has slots.
pub async fn write_chunk_hashes<P, W>(file: &File, perm: P, w: &mut W) -> Result<(), SyncError>
where
    P: Permutation,
    W: AsyncWrite + Unpin + ?Sized,
{
    let slots = perm.len();
    tracing::debug!(name = file.name(), chunks = file.chunk_count(), slots, "writing chunk hashes");

    let mut shuffler = StreamShuffler::new(perm, ChunkEntry::PLACEHOLDER);
    for chunk in file.chunks() {
        shuffler.put(*chunk)?;
        for entry in shuffler.ready() {
            write_chunk_entry(w, &entry).await?;
        }
    }
    shuffler.end();
    for entry in shuffler.ready() {
        write_chunk_entry(w, &entry).await?;
    }
    w.flush().await?;

    tracing::debug!(name = file.name(), slots, "chunk hashes written");
    Ok(())
}

/// What the receiver asked for in one real slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRequest {
    /// The receiver wants this chunk; its bytes, read from the store.
    Requested(ChunkEntry, Bytes),
    /// The receiver already has this chunk.
    Skipped(ChunkEntry),
}

/// Walks a file's chunks in slot order alongside the wishlist.
///
/// One wishlist bit is consumed per slot. Placeholder slots are checked and
/// skipped; every real slot yields a [`SlotRequest`]. Once the last slot is
/// walked the wishlist must be exhausted.
pub struct WishlistWalk<'a, S: ?Sized, P, R> {
    store: &'a S,
    chunks: std::slice::Iter<'a, ChunkEntry>,
    shuffler: StreamShuffler<P, ChunkEntry>,
    bits: BitReader<R>,
    ended: bool,
    done: bool,
}

impl<'a, S, P, R> WishlistWalk<'a, S, P, R>
where
    S: ChunkStore + ?Sized,
    P: Permutation,
    R: AsyncRead + Unpin,
{
    pub fn new(store: &'a S, file: &'a File, perm: P, wishlist: R) -> Self {
        Self {
            store,
            chunks: file.chunks(),
            shuffler: StreamShuffler::new(perm, ChunkEntry::PLACEHOLDER),
            bits: BitReader::new(wishlist),
            ended: false,
            done: false,
        }
    }

    /// Next real slot, or `None` once every slot is walked and the
    /// wishlist has been checked for trailing bytes.
    pub async fn next(&mut self) -> Result<Option<SlotRequest>, SyncError> {
        loop {
            if let Some(entry) = self.shuffler.pop() {
                let slot = self.slots_walked();
                let requested = self.bits.read_bit().await?;

                if entry.is_placeholder() {
                    if requested {
                        return Err(SyncError::SpuriousRequest { slot });
                    }
                    continue;
                }
                if requested {
                    let data = self.store.get(&entry.key)?;
                    return Ok(Some(SlotRequest::Requested(entry, data)));
                }
                if !self.store.contains(&entry.key)? {
                    return Err(SyncError::ChunkNotFound(entry.key));
                }
                return Ok(Some(SlotRequest::Skipped(entry)));
            }

            if let Some(chunk) = self.chunks.next() {
                self.shuffler.put(*chunk)?;
            } else if !self.ended {
                self.shuffler.end();
                self.ended = true;
            } else {
                if !self.done {
                    self.bits.finish().await?;
                    self.done = true;
                }
                return Ok(None);
            }
        }
    }

    /// Slots walked so far, placeholders included.
    pub fn slots_walked(&self) -> usize {
        self.bits.bits_read() as usize
    }
}

/// Phase 3: stream `varint(size) || bytes` for every requested chunk, in
/// slot order.
///
/// `on_status` runs once before the first chunk and again after every real
/// slot. Returns the final status.
pub async fn write_chunk_data<S, P, R, W, F>(
    store: &S,
    file: &File,
    perm: P,
    wishlist: R,
    w: &mut W,
    mut on_status: F,
) -> Result<TransferStatus, SyncError>
where
    S: ChunkStore + ?Sized,
    P: Permutation,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(TransferStatus),
{
    let mut status = TransferStatus {
        bytes_to_transfer: file.size(),
        bytes_transferred: 0,
    };
    on_status(status);
    tracing::debug!(name = file.name(), bytes = status.bytes_to_transfer, "writing chunk data");

    let mut walk = WishlistWalk::new(store, file, perm, wishlist);
    while let Some(request) = walk.next().await? {
        match request {
            SlotRequest::Requested(entry, data) => {
                if data.len() as u64 != entry.size {
                    return Err(SyncError::ShortChunkRead {
                        expected: entry.size,
                        actual: data.len() as u64,
                    });
                }
                write_varint(w, entry.size).await?;
                w.write_all(&data).await?;
                status.bytes_transferred += entry.size;
                tracing::trace!(key = hex::encode(entry.key), size = entry.size, "chunk sent");
            }
            SlotRequest::Skipped(entry) => {
                status.bytes_to_transfer -= entry.size;
            }
        }
        on_status(status);
    }
    w.flush().await?;

    tracing::debug!(
        name = file.name(),
        slots = walk.slots_walked(),
        transferred = status.bytes_transferred,
        "chunk data written"
    );
    Ok(status)
}
