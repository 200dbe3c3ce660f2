use crate::*;

use chunksync::sync_local;
use chunksync_store::{ChunkStoreExt, DiskStore};

/// A session driven entirely by a parsed config file: slot count, seed,
/// chunker bounds and the receiver's on-disk store root.
#[tokio::test]
async fn test_session_from_toml_config() -> Result<()> {
    init_tracing();
    let root = std::env::temp_dir().join(format!("chunksync-it-config-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);

    let text = format!(
        r#"
            [protocol]
            slot_count = 256
            seed = 99

            [receiver]
            concurrency = 3

            [pipe]
            capacity = 4

            [chunker]
            min_size = 512
            avg_size = 2048
            max_size = 8192

            [store]
            root = "{}"
        "#,
        root.display()
    );
    let config = SyncConfig::from_toml(&text)?;
    config.chunker.validate()?;

    let mut rng = StdRng::seed_from_u64(404);
    let mut data = vec![0u8; 100_000];
    rng.fill(&mut data[..]);

    let source = MemoryStore::new();
    let mut writer = source.create_with("cfg", config.chunker.clone());
    writer.write(&data)?;
    let file = writer.close()?;
    assert!(file.chunk_count() > 10, "small chunker bounds give many chunks");

    let target = DiskStore::open(&config.store)?;
    let report = sync_local(source, file.clone(), target.clone(), "cfg", &config, None).await?;

    assert_eq!(report.slots(), 256);
    assert_eq!(report.file.read_to_vec(&target)?, data);
    assert_eq!(target.root(), root);

    std::fs::remove_dir_all(&root).ok();
    Ok(())
}

/// Both peers derive the same permutation from the shared config.
#[test]
fn test_peers_agree_on_permutation() -> Result<()> {
    let sender = SyncConfig::from_toml("[protocol]\nslot_count = 64\nseed = 5\n")?;
    let receiver = SyncConfig::from_toml("[protocol]\nseed = 5\nslot_count = 64\n")?;
    assert_eq!(sender.protocol.permutation(), receiver.protocol.permutation());
    assert_eq!(sender.protocol.permutation().len(), 64);
    Ok(())
}
