use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::*;

use chunksync::{pipe, sync_local};
use chunksync_core::bits::BitWriter;
use chunksync_core::shuffle::ShuffleError;
use chunksync_core::wire::write_chunk_entry;
use chunksync_core::WireError;
use chunksync_store::StoreError;
use tokio::io::AsyncWriteExt;

/// Pack `bits` MSB-first, zero padded.
async fn pack(bits: &[bool]) -> Vec<u8> {
    let mut writer = BitWriter::new(Vec::new());
    for &b in bits {
        writer.write_bit(b).await.expect("writing to a Vec");
    }
    writer.finish().await.expect("writing to a Vec")
}

fn small_file(store: &MemoryStore) -> Result<File> {
    let (blocks, _) = overlapping_blocks(9, 3, 0.0);
    file_from_blocks(store, "small", &blocks)
}

/// A wishlist bit set on a placeholder slot is rejected by the sender.
#[tokio::test]
async fn test_spurious_request_on_placeholder() -> Result<()> {
    let source = MemoryStore::new();
    let file = small_file(&source)?;
    let perm = SeededPermutation::new(8, 6);

    let real = real_slots(&perm, file.chunk_count());
    let padding = (0..8)
        .find(|slot| !real.contains(slot))
        .context("some slot is padding")?;
    let bits: Vec<bool> = (0..8).map(|slot| slot == padding).collect();
    let wishlist = pack(&bits).await;

    let err = chunksync::write_chunk_data(
        &source,
        &file,
        &perm,
        &wishlist[..],
        &mut Vec::<u8>::new(),
        |_| {},
    )
    .await
    .unwrap_err();
    assert!(
        matches!(err, SyncError::SpuriousRequest { slot } if slot == padding),
        "got {err}"
    );
    Ok(())
}

/// The sender rejects a wishlist one byte short or one byte long.
#[tokio::test]
async fn test_wishlist_length_mismatch() -> Result<()> {
    let source = MemoryStore::new();
    let file = small_file(&source)?;
    let perm = SeededPermutation::new(16, 6);

    let truncated = vec![0u8; 1];
    let err = chunksync::write_chunk_data(
        &source,
        &file,
        &perm,
        &truncated[..],
        &mut Vec::<u8>::new(),
        |_| {},
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SyncError::Wire(WireError::WishlistTooShort)), "got {err}");

    let long = vec![0u8; 3];
    let err = chunksync::write_chunk_data(
        &source,
        &file,
        &perm,
        &long[..],
        &mut Vec::<u8>::new(),
        |_| {},
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SyncError::Wire(WireError::WishlistTooLong)), "got {err}");
    Ok(())
}

/// A hash stream aborted midway surfaces at the receiver as a peer abort
/// carrying the sender's reason.
#[tokio::test]
async fn test_aborted_hash_stream() -> Result<()> {
    init_tracing();
    let (mut w, mut r) = pipe(1);
    let writer = tokio::spawn(async move {
        for i in 0..3u8 {
            write_chunk_entry(&mut w, &ChunkEntry::new([i + 1; 32], 10)).await?;
        }
        w.abort("source store went away").await;
        Ok::<_, std::io::Error>(())
    });

    let builder = Builder::new(MemoryStore::new(), SeededPermutation::new(8, 1), 2, "out");
    let err = builder
        .write_wishlist(&mut r, &mut Vec::<u8>::new())
        .await
        .unwrap_err();
    writer.await??;

    assert!(err.is_peer_abort(), "got {err}");
    assert!(err.to_string().contains("source store went away"), "got {err}");
    Ok(())
}

/// A failure in one stage is reported by the session as the root cause,
/// not as the aborts it triggered downstream.
#[tokio::test]
async fn test_session_reports_root_cause() -> Result<()> {
    init_tracing();
    let source = MemoryStore::new();
    let (blocks, _) = overlapping_blocks(4, 6, 0.0);
    let file = file_from_blocks(&source, "six", &blocks)?;

    let err = sync_local(source, file, MemoryStore::new(), "out", &config(4, 2), None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, SyncError::Shuffle(ShuffleError::DomainExhausted { len: 4 })),
        "got {err}"
    );
    Ok(())
}

/// The sender lost a chunk after advertising it.
#[tokio::test]
async fn test_missing_source_chunk() -> Result<()> {
    init_tracing();
    let source = MemoryStore::new();
    let file = small_file(&source)?;
    let lost = file.chunks().nth(1).context("second chunk")?.key;
    source.remove(&lost);

    let err = sync_local(source, file, MemoryStore::new(), "out", &config(8, 3), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ChunkNotFound(k) if k == lost), "got {err}");
    Ok(())
}

/// Receiver side checks on the hash list: extra entries and placeholders
/// with a size are protocol violations.
#[tokio::test]
async fn test_malformed_hash_lists() -> Result<()> {
    let mut list: Vec<u8> = Vec::new();
    for i in 0..3u8 {
        write_chunk_entry(&mut list, &ChunkEntry::new([i + 7; 32], 1)).await?;
    }
    let builder = Builder::new(MemoryStore::new(), SeededPermutation::new(2, 0), 1, "out");
    let err = builder
        .write_wishlist(&mut &list[..], &mut Vec::<u8>::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Wire(WireError::HashListTooLong)), "got {err}");

    let mut bad: Vec<u8> = vec![0u8; 32];
    bad.write_u8(5).await?;
    let builder = Builder::new(MemoryStore::new(), SeededPermutation::new(1, 0), 1, "out");
    let err = builder
        .write_wishlist(&mut &bad[..], &mut Vec::<u8>::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Wire(WireError::InvalidPlaceholder(5))), "got {err}");
    Ok(())
}

/// Chunk data that does not match its advertised key is rejected and no
/// file is produced.
#[tokio::test]
async fn test_tampered_chunk_data() -> Result<()> {
    let source = MemoryStore::new();
    let file = small_file(&source)?;
    let perm = SeededPermutation::new(4, 5);
    let target = MemoryStore::new();

    let mut hashes: Vec<u8> = Vec::new();
    chunksync::write_chunk_hashes(&file, &perm, &mut hashes).await?;
    let builder = Builder::new(target.clone(), &perm, 2, "out");
    let mut wishlist: Vec<u8> = Vec::new();
    builder.write_wishlist(&mut &hashes[..], &mut wishlist).await?;

    let mut data: Vec<u8> = Vec::new();
    chunksync::write_chunk_data(&source, &file, &perm, &wishlist[..], &mut data, |_| {}).await?;
    let last = data.len() - 1;
    data[last] ^= 0xff;

    let err = builder.reconstruct(&mut &data[..]).await.unwrap_err();
    assert!(matches!(err, SyncError::ChunkMismatch(_)), "got {err}");
    Ok(())
}

/// Target store whose writes start failing after `budget` successes.
#[derive(Clone)]
struct FailingPut {
    inner: MemoryStore,
    budget: Arc<AtomicUsize>,
}

impl FailingPut {
    fn new(budget: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            budget: Arc::new(AtomicUsize::new(budget)),
        }
    }
}

impl ChunkStore for FailingPut {
    fn contains(&self, key: &ChunkKey) -> Result<bool, StoreError> {
        self.inner.contains(key)
    }

    fn get(&self, key: &ChunkKey) -> Result<Bytes, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, data: Bytes) -> Result<ChunkKey, StoreError> {
        let granted = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if granted.is_err() {
            return Err(StoreError::Io {
                path: "target".into(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.put(data)
    }
}

/// A failure in the last stage unwinds back through every upstream stage:
/// the session ends promptly and reports the store error.
#[tokio::test]
async fn test_reconstruct_failure_unwinds_session() -> Result<()> {
    init_tracing();
    let source = MemoryStore::new();
    let (blocks, _) = overlapping_blocks(21, 400, 0.0);
    let file = file_from_blocks(&source, "many", &blocks)?;

    let cfg = config(4096, 8);
    let session = sync_local(source, file, FailingPut::new(2), "out", &cfg, None);
    let err = tokio::time::timeout(Duration::from_secs(30), session)
        .await
        .context("session did not unwind")?
        .unwrap_err();

    let disk_full = matches!(
        &err,
        SyncError::Store(StoreError::Io { source, .. }) if source.to_string() == "disk full"
    );
    assert!(disk_full, "got {err}");
    Ok(())
}

