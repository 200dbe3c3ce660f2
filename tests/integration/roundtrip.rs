use crate::*;

use chunksync::{pipe, sync_local};
use chunksync_store::{ChunkStoreExt, DiskStore};

const OVERLAPS: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];
const CHUNK_COUNTS: [usize; 6] = [0, 1, 2, 4, 16, 64];

/// Full session over every overlap and chunk count: the rebuilt file is
/// byte-identical and only chunks the target lacked cross the wire.
#[tokio::test]
async fn test_roundtrip_across_overlaps() -> Result<()> {
    init_tracing();
    for (case, &blocks) in CHUNK_COUNTS.iter().enumerate() {
        for &overlap in &OVERLAPS {
            let seed = 1000 + case as u64;
            let (src_blocks, dst_blocks) = overlapping_blocks(seed, blocks, overlap);

            let source = MemoryStore::new();
            let file = file_from_blocks(&source, "src", &src_blocks)?;
            let target = MemoryStore::new();
            file_from_blocks(&target, "prior", &dst_blocks)?;

            let missing = missing_keys(&target, &file)?;
            let missing_bytes: u64 = file
                .chunks()
                .filter(|c| missing.contains(&c.key))
                .map(|c| c.size)
                .sum::<u64>();

            let slots = blocks * 2 + 3;
            let report = sync_local(
                source.clone(),
                file.clone(),
                target.clone(),
                "dst",
                &config(slots, seed),
                None,
            )
            .await
            .with_context(|| format!("blocks={blocks} overlap={overlap}"))?;

            let label = format!("blocks={blocks} overlap={overlap} seed={seed}");
            assert_eq!(
                report.file.read_to_vec(&target)?,
                file.read_to_vec(&source)?,
                "{label}"
            );
            assert_eq!(report.file.size(), file.size(), "{label}");
            assert_eq!(report.file.chunk_count(), blocks, "{label}");
            assert_eq!(report.chunks_requested(), missing.len(), "{label}");
            assert_eq!(report.slots(), slots, "{label}");
            assert!(report.status.is_complete(), "{label}");
            // Duplicate blocks are sent once, so compare distinct bytes.
            assert!(report.bytes_transferred() <= missing_bytes, "{label}");
        }
    }
    Ok(())
}

/// A slot count exactly equal to the chunk count leaves no placeholders.
#[tokio::test]
async fn test_roundtrip_with_no_padding() -> Result<()> {
    let (src_blocks, dst_blocks) = overlapping_blocks(77, 16, 0.5);
    let source = MemoryStore::new();
    let file = file_from_blocks(&source, "src", &src_blocks)?;
    let target = MemoryStore::new();
    file_from_blocks(&target, "prior", &dst_blocks)?;

    let report = sync_local(
        source.clone(),
        file.clone(),
        target.clone(),
        "dst",
        &config(16, 3),
        None,
    )
    .await?;
    assert_eq!(report.file.read_to_vec(&target)?, file.read_to_vec(&source)?);
    Ok(())
}

/// Content-defined chunking: an edited copy shares most chunks, so only the
/// edited region is transferred.
#[tokio::test]
async fn test_edited_file_transfers_only_changes() -> Result<()> {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(2024);
    let mut original = vec![0u8; 256 * 1024];
    rng.fill(&mut original[..]);
    let mut edited = original.clone();
    for byte in &mut edited[100_000..100_100] {
        *byte = byte.wrapping_add(1);
    }

    let target = MemoryStore::new();
    let mut writer = target.create("old");
    writer.write(&original)?;
    writer.close()?;

    let source = MemoryStore::new();
    let mut writer = source.create("new");
    for piece in edited.chunks(10_000) {
        writer.write(piece)?;
    }
    let file = writer.close()?;

    let report = sync_local(
        source,
        file.clone(),
        target.clone(),
        "new",
        &config(1024, 9),
        None,
    )
    .await?;

    assert_eq!(report.file.read_to_vec(&target)?, edited);
    assert!(report.chunks_requested() >= 1);
    assert!(
        report.chunks_requested() < file.chunk_count() / 2,
        "requested {} of {}",
        report.chunks_requested(),
        file.chunk_count()
    );
    Ok(())
}

/// Every duplicate of a missing key is requested once.
#[tokio::test]
async fn test_repeated_chunks_are_transferred_once() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(31);
    let a = random_block(&mut rng);
    let b = random_block(&mut rng);
    let blocks = vec![a.clone(), b.clone(), a.clone(), a.clone(), b];

    let source = MemoryStore::new();
    let file = file_from_blocks(&source, "repeats", &blocks)?;
    let target = MemoryStore::new();

    let report = sync_local(
        source.clone(),
        file.clone(),
        target.clone(),
        "copy",
        &config(12, 4),
        None,
    )
    .await?;

    assert_eq!(report.chunks_requested(), 2);
    assert_eq!(report.wishlist.duplicates, 3);
    assert_eq!(report.file.read_to_vec(&target)?, file.read_to_vec(&source)?);
    assert_eq!(target.count(), 2);
    Ok(())
}

/// The receiver can persist to disk.
#[tokio::test]
async fn test_sync_into_disk_store() -> Result<()> {
    init_tracing();
    let dir = std::env::temp_dir().join(format!("chunksync-it-disk-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let disk = DiskStore::new(&dir)?;

    let (src_blocks, _) = overlapping_blocks(12, 8, 0.0);
    let source = MemoryStore::new();
    let file = file_from_blocks(&source, "src", &src_blocks)?;

    let report = sync_local(
        source.clone(),
        file.clone(),
        disk.clone(),
        "on-disk",
        &config(32, 1),
        None,
    )
    .await?;
    assert_eq!(report.file.read_to_vec(&disk)?, file.read_to_vec(&source)?);
    assert_eq!(disk.count(), 8);

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}

/// The stages run over any byte transport, not only the in-process pipe.
/// The hash list is written in full before the wishlist is read, so the
/// wishlist must fit in the duplex buffer.
#[tokio::test]
async fn test_stages_over_duplex_streams() -> Result<()> {
    let (src_blocks, dst_blocks) = overlapping_blocks(55, 24, 0.5);
    let source = MemoryStore::new();
    let file = file_from_blocks(&source, "src", &src_blocks)?;
    let target = MemoryStore::new();
    file_from_blocks(&target, "prior", &dst_blocks)?;
    let missing = missing_keys(&target, &file)?;

    let perm = std::sync::Arc::new(SeededPermutation::new(40, 8));
    let builder = std::sync::Arc::new(Builder::new(target.clone(), perm.clone(), 3, "dst"));

    let (mut hash_w, mut hash_r) = tokio::io::duplex(64);
    let (mut wish_w, wish_r) = tokio::io::duplex(64);
    let (data_w, mut data_r) = pipe(2);

    let sender = {
        let file = file.clone();
        let perm = perm.clone();
        let source = source.clone();
        tokio::spawn(async move {
            chunksync::write_chunk_hashes(&file, perm.clone(), &mut hash_w).await?;
            drop(hash_w);
            let mut data_w = tokio::io::BufWriter::new(data_w);
            let status =
                chunksync::write_chunk_data(&source, &file, perm, wish_r, &mut data_w, |_| {})
                    .await?;
            tokio::io::AsyncWriteExt::shutdown(&mut data_w).await?;
            Ok::<_, SyncError>(status)
        })
    };
    let wishlist = {
        let builder = builder.clone();
        tokio::spawn(async move {
            let summary = builder.write_wishlist(&mut hash_r, &mut wish_w).await?;
            drop(wish_w);
            Ok::<_, SyncError>(summary)
        })
    };

    let rebuilt = builder.reconstruct(&mut data_r).await?;
    let status = sender.await??;
    let summary = wishlist.await??;

    assert_eq!(rebuilt.read_to_vec(&target)?, file.read_to_vec(&source)?);
    assert_eq!(summary.requested, missing.len());
    assert_eq!(status.bytes_transferred, summary.requested_bytes);
    Ok(())
}
