use crate::*;

use chunksync_core::wire::decode_varint;

/// Two empty files over four slots: four placeholder entries, one zero
/// wishlist byte, no chunk data, an empty result.
#[tokio::test]
async fn test_empty_file_over_four_slots() -> Result<()> {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    let file = File::from_chunks("empty", Vec::new());
    let perm = SeededPermutation::new(4, 0);

    let t = run_sequential(&source, &file, &target, &perm).await?;

    assert_eq!(t.hashes, vec![0u8; 4 * 33]);
    assert_eq!(t.wishlist, vec![0u8]);
    assert!(t.data.is_empty());
    assert_eq!(t.file.size(), 0);
    assert_eq!(t.file.chunk_count(), 0);
    assert_eq!(t.summary.requested, 0);
    assert_eq!(t.status, TransferStatus::default());
    Ok(())
}

/// Three chunks, the middle one already held by the receiver under another
/// file: only the first and last are requested and sent.
#[tokio::test]
async fn test_middle_chunk_sourced_locally() -> Result<()> {
    let k1 = b"first chunk of the file".to_vec();
    let k2 = b"the middle chunk, already present".to_vec();
    let k3 = b"last".to_vec();

    let source = MemoryStore::new();
    let file = file_from_blocks(&source, "three", &[k1.clone(), k2.clone(), k3.clone()])?;
    let keys: Vec<ChunkKey> = file.chunks().map(|c| c.key).collect();

    let target = MemoryStore::new();
    file_from_blocks(&target, "older", &[k2.clone()])?;

    let perm = SeededPermutation::new(8, 42);
    let t = run_sequential(&source, &file, &target, &perm).await?;

    for slot in 0..8 {
        let expected = slot == perm.forward(0) || slot == perm.forward(2);
        assert_eq!(bit(&t.wishlist, slot), expected, "slot {slot}");
    }
    assert_eq!(t.wishlist.len(), 1);

    // Exactly two length-prefixed chunks, in slot order.
    let mut rest = &t.data[..];
    let mut sent = Vec::new();
    while !rest.is_empty() {
        let (len, tail) = decode_varint(rest)?;
        let (chunk, tail) = tail.split_at(len as usize);
        sent.push(chunk.to_vec());
        rest = tail;
    }
    let mut expected = vec![(perm.forward(0), k1.clone()), (perm.forward(2), k3.clone())];
    expected.sort();
    let expected: Vec<Vec<u8>> = expected.into_iter().map(|(_, chunk)| chunk).collect();
    assert_eq!(sent, expected);

    let rebuilt: Vec<ChunkKey> = t.file.chunks().map(|c| c.key).collect();
    assert_eq!(rebuilt, keys);
    assert_eq!(t.file.read_to_vec(&target)?, [k1, k2, k3].concat());
    assert_eq!(t.status.bytes_transferred, 23 + 4);
    Ok(())
}
