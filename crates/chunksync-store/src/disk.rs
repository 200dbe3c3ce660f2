//! On-disk content-addressed chunk store.
//!
//! Chunks are stored by content hash in a two-level directory structure:
//!   {root}/{hash[0..2]}/{full_hash}
//!
//! This is the same layout Git uses for objects. Files are immutable:
//! if the hash exists, the content is correct. Every write goes to its own
//! temp file and is renamed into place, so concurrent puts of the same
//! chunk never touch a file another thread can see.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use chunksync_core::config::StoreConfig;
use chunksync_core::crypto::hash;
use chunksync_core::ChunkKey;

use crate::store::{ChunkStore, StoreError};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Content-addressed chunk store rooted at a directory.
#[derive(Clone)]
pub struct DiskStore {
    root: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl DiskStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(io_err(&root))?;
        Ok(Self { root })
    }

    /// Open the store at the configured root.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let store = Self::new(&config.root)?;
        tracing::debug!(root = %store.root.display(), "disk store opened");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the filesystem path for a chunk.
    fn chunk_path(&self, key: &ChunkKey) -> PathBuf {
        let hex = hex::encode(key);
        self.root.join(&hex[0..2]).join(&hex)
    }

    /// Count total chunks in the store.
    pub fn count(&self) -> usize {
        let mut total = 0;
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                if let Ok(subdir) = fs::read_dir(entry.path()) {
                    total += subdir.count();
                }
            }
        }
        total
    }

    /// Total stored bytes.
    pub fn size(&self) -> u64 {
        let mut total = 0u64;
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                if let Ok(subdir) = fs::read_dir(entry.path()) {
                    for chunk in subdir.flatten() {
                        if let Ok(meta) = chunk.metadata() {
                            total += meta.len();
                        }
                    }
                }
            }
        }
        total
    }
}

impl ChunkStore for DiskStore {
    fn contains(&self, key: &ChunkKey) -> Result<bool, StoreError> {
        Ok(self.chunk_path(key).exists())
    }

    fn get(&self, key: &ChunkKey) -> Result<Bytes, StoreError> {
        let path = self.chunk_path(key);
        match fs::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(*key)),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Writes are atomic: write to temp file, then rename.
    fn put(&self, data: Bytes) -> Result<ChunkKey, StoreError> {
        let key = hash(&data);
        let path = self.chunk_path(&key);
        if path.exists() {
            return Ok(key);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let tmp_path = path.with_extension(format!(
            "tmp{}-{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let written = fs::File::create_new(&tmp_path).and_then(|mut file| {
            file.write_all(&data)?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_err(&tmp_path)(e));
        }
        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            // Another writer placed the same content first.
            if path.exists() {
                return Ok(key);
            }
            return Err(io_err(&path)(e));
        }

        tracing::trace!(key = hex::encode(key), len = data.len(), "chunk stored");
        Ok(key)
    }
}
