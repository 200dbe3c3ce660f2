//! In-process sync session.
//!
//! Runs the four stages as tokio tasks over three [`pipe`]s:
//!
//! ```text
//!   write_chunk_hashes ──hashes──▶ Builder::write_wishlist
//!   write_chunk_data   ◀─wishlist─ Builder::write_wishlist
//!   write_chunk_data   ──data────▶ Builder::reconstruct
//! ```
//!
//! A stage that fails aborts the pipe it writes, so the failure unwinds
//! through every stage. The error reported is the root cause, not the
//! aborts it set off.

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::task::JoinHandle;

use chunksync_core::config::SyncConfig;
use chunksync_core::Permutation;
use chunksync_store::{ChunkStore, File};

use crate::builder::{Builder, WishlistSummary};
use crate::error::SyncError;
use crate::pipe::{pipe, PipeWriter};
use crate::send::{write_chunk_data, write_chunk_hashes};
use crate::status::{StatusCallback, TransferStatus};

/// Outcome of a completed session.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// The reconstructed file, sealed in the target store.
    pub file: File,
    pub wishlist: WishlistSummary,
    /// Final sender-side status.
    pub status: TransferStatus,
}

impl SyncReport {
    pub fn slots(&self) -> usize {
        self.wishlist.slots
    }

    pub fn chunks_requested(&self) -> usize {
        self.wishlist.requested
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.status.bytes_transferred
    }
}

/// Sync `file` from `source` into `target` as `name`.
///
/// Slot count, seed, receiver concurrency and pipe capacity come from
/// `config`.
pub async fn sync_local<S, T>(
    source: S,
    file: File,
    target: T,
    name: &str,
    config: &SyncConfig,
    on_status: Option<StatusCallback>,
) -> Result<SyncReport, SyncError>
where
    S: ChunkStore + Clone + 'static,
    T: ChunkStore + Clone + 'static,
{
    let perm = Arc::new(config.protocol.permutation());
    let capacity = config.pipe.capacity;
    let builder = Arc::new(Builder::new(
        target,
        perm.clone(),
        config.receiver.effective_concurrency(),
        name,
    ));

    tracing::debug!(
        source = file.name(),
        dest = name,
        slots = perm.len(),
        seed = config.protocol.seed,
        "sync session starting"
    );

    let (hash_tx, hash_rx) = pipe(capacity);
    let (wish_tx, wish_rx) = pipe(capacity);
    let (data_tx, data_rx) = pipe(capacity);

    let hashes: JoinHandle<Result<(), SyncError>> = {
        let file = file.clone();
        let perm = perm.clone();
        tokio::spawn(async move {
            let mut w = BufWriter::new(hash_tx);
            let result = write_chunk_hashes(&file, perm, &mut w).await;
            finish_stage("hashes", w.into_inner(), result).await
        })
    };

    let wishlist: JoinHandle<Result<WishlistSummary, SyncError>> = {
        let builder = builder.clone();
        tokio::spawn(async move {
            // Unbuffered: each wishlist byte reaches the sender as soon as
            // its eight slots are decided.
            let mut r = BufReader::new(hash_rx);
            let mut w = wish_tx;
            let result = builder.write_wishlist(&mut r, &mut w).await;
            finish_stage("wishlist", w, result).await
        })
    };

    let data: JoinHandle<Result<TransferStatus, SyncError>> = {
        let perm = perm.clone();
        let mut on_status = on_status;
        tokio::spawn(async move {
            let r = BufReader::new(wish_rx);
            let mut w = BufWriter::new(data_tx);
            let result = write_chunk_data(&source, &file, perm, r, &mut w, |status| {
                if let Some(cb) = on_status.as_mut() {
                    cb(status);
                }
            })
            .await;
            finish_stage("data", w.into_inner(), result).await
        })
    };

    let rebuilt: JoinHandle<Result<File, SyncError>> = {
        let builder = builder.clone();
        tokio::spawn(async move {
            let mut r = BufReader::new(data_rx);
            let result = builder.reconstruct(&mut r).await;
            if let Err(e) = &result {
                tracing::warn!(stage = "reconstruct", error = %e, "sync stage failed");
            }
            result
        })
    };

    let hashes = joined(hashes.await);
    let wishlist = joined(wishlist.await);
    let data = joined(data.await);
    let rebuilt = joined(rebuilt.await);

    let mut errors = Vec::new();
    let hashes = hashes.map_err(|e| errors.push(e)).ok();
    let wishlist = wishlist.map_err(|e| errors.push(e)).ok();
    let status = data.map_err(|e| errors.push(e)).ok();
    let rebuilt = rebuilt.map_err(|e| errors.push(e)).ok();

    match (hashes, wishlist, status, rebuilt) {
        (Some(()), Some(wishlist), Some(status), Some(file)) => {
            tracing::debug!(
                dest = name,
                requested = wishlist.requested,
                transferred = status.bytes_transferred,
                "sync session complete"
            );
            Ok(SyncReport {
                file,
                wishlist,
                status,
            })
        }
        _ => Err(root_cause(errors)),
    }
}

/// Close the stage's outbound pipe: cleanly on success, with the error
/// otherwise. Successful stages have already flushed any buffering in
/// front of `w`.
async fn finish_stage<T>(
    stage: &'static str,
    mut w: PipeWriter,
    result: Result<T, SyncError>,
) -> Result<T, SyncError> {
    match result {
        Ok(value) => {
            w.shutdown().await?;
            Ok(value)
        }
        Err(e) => {
            tracing::warn!(stage, error = %e, "sync stage failed");
            w.abort(&e).await;
            Err(e)
        }
    }
}

fn joined<T>(
    result: Result<Result<T, SyncError>, tokio::task::JoinError>,
) -> Result<T, SyncError> {
    result.map_err(|e| SyncError::Task(e.to_string()))?
}

/// Pick the error that started the unwinding. Stages that failed only
/// because a neighbour went away are consequences, as is a reconstruction
/// starved of slot records.
fn root_cause(errors: Vec<SyncError>) -> SyncError {
    let is_consequence =
        |e: &SyncError| e.is_peer_abort() || matches!(e, SyncError::WishlistMissing);
    let mut fallback = None;
    for e in errors {
        if !is_consequence(&e) {
            return e;
        }
        fallback.get_or_insert(e);
    }
    fallback.unwrap_or_else(|| SyncError::Task("session failed without an error".into()))
}
