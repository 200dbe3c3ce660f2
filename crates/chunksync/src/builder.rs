//! Receiver: answers the hash list with a wishlist, then rebuilds the file.
//!
//! The two halves run as separate stages. [`Builder::write_wishlist`]
//! records every slot it reads; [`Builder::reconstruct`] replays those
//! records against the incoming chunk data. Records travel over an
//! unbounded channel so the halves can run concurrently without either
//! one waiting on the other's progress.

use std::collections::{HashSet, VecDeque};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use chunksync_core::bits::BitWriter;
use chunksync_core::wire::{at_eof, read_chunk_entry, read_varint};
use chunksync_core::{ChunkEntry, ChunkKey, Inverted, Permutation, StreamShuffler, WireError};
use chunksync_store::{ChunkStore, File, StoreError};

use crate::error::SyncError;

/// Largest up-front allocation for one incoming chunk. Bigger chunks grow
/// the buffer as bytes actually arrive.
const MAX_PREALLOC: u64 = 1 << 20;

#[derive(Debug, Clone, Copy)]
struct Slot {
    entry: ChunkEntry,
    requested: bool,
}

enum Lookup {
    /// No possession check needed: a placeholder, or a key already seen
    /// earlier in this session.
    Settled,
    Pending(JoinHandle<Result<bool, StoreError>>),
}

/// Counts produced by the wishlist half.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WishlistSummary {
    pub slots: usize,
    /// Slots carrying a real chunk.
    pub chunks: usize,
    /// Slots marked for transfer.
    pub requested: usize,
    pub requested_bytes: u64,
    /// Real slots repeating a key seen in an earlier slot.
    pub duplicates: usize,
}

/// One receiving session.
pub struct Builder<S, P> {
    store: S,
    perm: P,
    concurrency: usize,
    name: String,
    slots_tx: Mutex<Option<mpsc::UnboundedSender<Slot>>>,
    slots_rx: Mutex<Option<mpsc::UnboundedReceiver<Slot>>>,
}

impl<S, P> Builder<S, P>
where
    S: ChunkStore + Clone + 'static,
    P: Permutation,
{
    /// `concurrency` bounds possession checks in flight; 0 is treated as 1.
    /// `name` becomes the reconstructed file's name.
    pub fn new(store: S, perm: P, concurrency: usize, name: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            store,
            perm,
            concurrency: concurrency.max(1),
            name: name.to_string(),
            slots_tx: Mutex::new(Some(tx)),
            slots_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.perm.len()
    }

    /// Phase 2: read the hash list and answer with one bit per slot.
    ///
    /// A real chunk is requested when the store lacks it and no earlier slot
    /// already requested the same key. The hash list must end exactly after
    /// the last slot.
    pub async fn write_wishlist<R, W>(
        &self,
        r: &mut R,
        w: &mut W,
    ) -> Result<WishlistSummary, SyncError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let tx = self
            .slots_tx
            .lock()
            .await
            .take()
            .ok_or(SyncError::AlreadyRan("write_wishlist"))?;

        let slots = self.perm.len();
        tracing::debug!(
            name = %self.name,
            slots,
            concurrency = self.concurrency,
            "writing wishlist"
        );

        let mut bits = BitWriter::new(w);
        let mut summary = WishlistSummary {
            slots,
            ..Default::default()
        };
        let mut in_flight: VecDeque<(ChunkEntry, Lookup)> = VecDeque::new();
        let mut seen: HashSet<ChunkKey> = HashSet::new();

        for _ in 0..slots {
            let entry = read_chunk_entry(r).await?;
            let lookup = if entry.is_placeholder() {
                Lookup::Settled
            } else {
                summary.chunks += 1;
                if seen.insert(entry.key) {
                    let store = self.store.clone();
                    let key = entry.key;
                    Lookup::Pending(tokio::task::spawn_blocking(move || store.contains(&key)))
                } else {
                    summary.duplicates += 1;
                    Lookup::Settled
                }
            };
            in_flight.push_back((entry, lookup));

            while in_flight.len() >= self.concurrency {
                if let Some((entry, lookup)) = in_flight.pop_front() {
                    let requested = settle(lookup).await?;
                    record(&mut bits, &tx, &mut summary, entry, requested).await?;
                }
            }
        }
        while let Some((entry, lookup)) = in_flight.pop_front() {
            let requested = settle(lookup).await?;
            record(&mut bits, &tx, &mut summary, entry, requested).await?;
        }

        if !at_eof(r).await? {
            return Err(WireError::HashListTooLong.into());
        }
        let written = bits.bits_written();
        bits.finish().await?;

        tracing::debug!(
            name = %self.name,
            bits = written,
            requested = summary.requested,
            bytes = summary.requested_bytes,
            duplicates = summary.duplicates,
            "wishlist written"
        );
        Ok(summary)
    }

    /// Phase 4: read the requested chunks and seal the new file.
    ///
    /// Requested chunks are verified against their advertised key and size
    /// and stored as they arrive. Chunks already held locally are recorded
    /// with their stored length. The data stream must end after the last
    /// one. On failure no file is produced; chunks already stored stay in
    /// the store.
    pub async fn reconstruct<R>(&self, r: &mut R) -> Result<File, SyncError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut rx = self
            .slots_rx
            .lock()
            .await
            .take()
            .ok_or(SyncError::AlreadyRan("reconstruct"))?;

        let slots = self.perm.len();
        tracing::debug!(name = %self.name, slots, "reconstructing");

        let mut restore = StreamShuffler::new(Inverted(&self.perm), ChunkEntry::PLACEHOLDER);
        let mut chunks = Vec::new();
        let mut tail_started = false;

        for _ in 0..slots {
            let slot = rx.recv().await.ok_or(SyncError::WishlistMissing)?;
            let mut entry = slot.entry;

            if slot.requested {
                self.receive_chunk(r, &entry).await?;
            } else if !entry.is_placeholder() {
                let local = self.local_len(entry.key).await?;
                if local != entry.size {
                    tracing::debug!(
                        key = hex::encode(entry.key),
                        advertised = entry.size,
                        local,
                        "advertised size differs from stored chunk"
                    );
                    entry.size = local;
                }
            }

            restore.put(entry)?;
            for logical in restore.ready() {
                place(&mut chunks, &mut tail_started, logical)?;
            }
        }
        restore.end();
        for logical in restore.ready() {
            place(&mut chunks, &mut tail_started, logical)?;
        }

        if !at_eof(r).await? {
            return Err(SyncError::TrailingData);
        }

        let file = File::from_chunks(&self.name, chunks);
        tracing::debug!(
            name = %self.name,
            chunks = file.chunk_count(),
            size = file.size(),
            "file reconstructed"
        );
        Ok(file)
    }

    async fn receive_chunk<R>(&self, r: &mut R, entry: &ChunkEntry) -> Result<(), SyncError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let size = read_varint(r).await?;
        if size != entry.size {
            return Err(SyncError::ShortChunkRead {
                expected: entry.size,
                actual: size,
            });
        }

        let mut data = Vec::with_capacity(size.min(MAX_PREALLOC) as usize);
        (&mut *r).take(size).read_to_end(&mut data).await?;
        if data.len() as u64 != size {
            return Err(SyncError::ShortChunkRead {
                expected: size,
                actual: data.len() as u64,
            });
        }

        let store = self.store.clone();
        let data = Bytes::from(data);
        let key = tokio::task::spawn_blocking(move || store.put(data))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))??;
        if key != entry.key {
            return Err(SyncError::ChunkMismatch(entry.key));
        }

        tracing::trace!(key = hex::encode(key), size, "chunk received");
        Ok(())
    }

    /// Length of a chunk already in the store; `ChunkNotFound` if it is not.
    async fn local_len(&self, key: ChunkKey) -> Result<u64, SyncError> {
        let store = self.store.clone();
        let data = tokio::task::spawn_blocking(move || store.get(&key))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))??;
        Ok(data.len() as u64)
    }
}

/// Resolve a lookup to "request this slot".
async fn settle(lookup: Lookup) -> Result<bool, SyncError> {
    match lookup {
        Lookup::Settled => Ok(false),
        Lookup::Pending(handle) => {
            let present = handle.await.map_err(|e| SyncError::Task(e.to_string()))??;
            Ok(!present)
        }
    }
}

async fn record<W>(
    bits: &mut BitWriter<W>,
    tx: &mpsc::UnboundedSender<Slot>,
    summary: &mut WishlistSummary,
    entry: ChunkEntry,
    requested: bool,
) -> Result<(), SyncError>
where
    W: AsyncWrite + Unpin,
{
    // A closed receiver means reconstruction already gave up; the wishlist
    // itself is still owed to the sender.
    let _ = tx.send(Slot { entry, requested });
    if requested {
        summary.requested += 1;
        summary.requested_bytes += entry.size;
    }
    bits.write_bit(requested).await?;
    Ok(())
}

/// Append one logically ordered entry. Placeholders fill the tail; a real
/// chunk after one means the peer's slot assignment does not match ours.
fn place(
    chunks: &mut Vec<ChunkEntry>,
    tail_started: &mut bool,
    entry: ChunkEntry,
) -> Result<(), SyncError> {
    if entry.is_placeholder() {
        *tail_started = true;
    } else if *tail_started {
        return Err(SyncError::MisplacedPlaceholder { index: chunks.len() });
    } else {
        chunks.push(entry);
    }
    Ok(())
}
