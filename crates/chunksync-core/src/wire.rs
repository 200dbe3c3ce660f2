//! chunksync wire format: byte-exact encodings shared by sender and receiver.
//!
//! Two record types travel over plain byte streams:
//!
//!   hash-list entry:    key (32 bytes) || varint(size)
//!   chunk-data record:  varint(size) || size raw bytes
//!
//! Varints are unsigned LEB128: seven data bits per byte, least significant
//! group first, high bit set on every byte except the last. A u64 never
//! needs more than ten bytes.
//!
//! The hash list is padded with placeholder entries (all-zero key, size 0).
//! A placeholder with any other size is rejected on read.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// ── Keys ──────────────────────────────────────────────────────────────────────

/// Width of a content hash on the wire.
pub const KEY_LEN: usize = 32;

/// BLAKE3 content hash identifying a chunk.
pub type ChunkKey = [u8; KEY_LEN];

/// Key of the placeholder chunk. Never looked up in storage.
pub const EMPTY_KEY: ChunkKey = [0u8; KEY_LEN];

// ── Chunk Entry ───────────────────────────────────────────────────────────────

/// One advertised chunk: its content hash and byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkEntry {
    pub key: ChunkKey,
    pub size: u64,
}

impl ChunkEntry {
    /// Sentinel filling shuffled slots that carry no real chunk.
    pub const PLACEHOLDER: ChunkEntry = ChunkEntry {
        key: EMPTY_KEY,
        size: 0,
    };

    pub fn new(key: ChunkKey, size: u64) -> Self {
        Self { key, size }
    }

    pub fn is_placeholder(&self) -> bool {
        self.key == EMPTY_KEY
    }
}

/// Write one hash-list entry.
pub async fn write_chunk_entry<W>(w: &mut W, entry: &ChunkEntry) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    w.write_all(&entry.key).await?;
    write_varint(w, entry.size).await
}

/// Read one hash-list entry.
///
/// End of stream before a complete key is `HashListTooShort`; end of stream
/// inside the size is `MalformedVarint`.
pub async fn read_chunk_entry<R>(r: &mut R) -> Result<ChunkEntry, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut key = EMPTY_KEY;
    if let Err(e) = r.read_exact(&mut key).await {
        return Err(match e.kind() {
            io::ErrorKind::UnexpectedEof => WireError::HashListTooShort,
            _ => WireError::Io(e),
        });
    }
    let size = read_varint(r).await?;
    if key == EMPTY_KEY && size != 0 {
        return Err(WireError::InvalidPlaceholder(size));
    }
    Ok(ChunkEntry { key, size })
}

// ── Varint ────────────────────────────────────────────────────────────────────

/// Longest possible encoding of a u64.
pub const MAX_VARINT_LEN: usize = 10;

/// Encode `value` into `buf`, returning the number of bytes used.
pub fn encode_varint(mut value: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut len = 0;
    while value >= 0x80 {
        buf[len] = (value as u8) | 0x80;
        value >>= 7;
        len += 1;
    }
    buf[len] = value as u8;
    len + 1
}

/// Decode a varint from the front of `bytes`, returning the value and the
/// unconsumed remainder.
pub fn decode_varint(bytes: &[u8]) -> Result<(u64, &[u8]), WireError> {
    let mut value = 0u64;
    for (index, &byte) in bytes.iter().enumerate().take(MAX_VARINT_LEN) {
        value = accumulate(value, index, byte)?;
        if byte & 0x80 == 0 {
            return Ok((value, &bytes[index + 1..]));
        }
    }
    Err(WireError::MalformedVarint)
}

/// Write `value` as a varint.
pub async fn write_varint<W>(w: &mut W, value: u64) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_varint(value, &mut buf);
    w.write_all(&buf[..len]).await
}

/// Read a varint one byte at a time. Wrap slow sources in a `BufReader`.
pub async fn read_varint<R>(r: &mut R) -> Result<u64, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut value = 0u64;
    for index in 0..MAX_VARINT_LEN {
        let byte = match r.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(WireError::MalformedVarint)
            }
            Err(e) => return Err(WireError::Io(e)),
        };
        value = accumulate(value, index, byte)?;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(WireError::MalformedVarint)
}

// The tenth byte may only contribute the single remaining bit of a u64.
fn accumulate(value: u64, index: usize, byte: u8) -> Result<u64, WireError> {
    if index == MAX_VARINT_LEN - 1 && byte > 1 {
        return Err(WireError::MalformedVarint);
    }
    Ok(value | (u64::from(byte & 0x7f) << (7 * index)))
}

// ── End of stream ─────────────────────────────────────────────────────────────

/// Returns true if `r` is exhausted. Consumes one byte if it is not.
pub async fn at_eof<R>(r: &mut R) -> io::Result<bool>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut probe = [0u8; 1];
    Ok(r.read(&mut probe).await? == 0)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed varint: truncated or longer than {} bytes", MAX_VARINT_LEN)]
    MalformedVarint,

    #[error("wishlist too short")]
    WishlistTooShort,

    #[error("wishlist too long")]
    WishlistTooLong,

    #[error("hash list ended before all slots were received")]
    HashListTooShort,

    #[error("hash list continues past the last slot")]
    HashListTooLong,

    #[error("placeholder entry carries non-zero size {0}")]
    InvalidPlaceholder(u64),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
