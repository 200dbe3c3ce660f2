//! Bit-level codec for the wishlist stream.
//!
//! Bits are packed MSB-first: the first bit written lands in bit 7 of the
//! first byte. `BitWriter::finish` pads the final partial byte with zeros.
//!
//! The stream carries no length. The reader relies on both peers knowing the
//! slot count, and brackets it with two checks:
//!   - running out of bytes while a bit is still expected is `WishlistTooShort`
//!   - a byte left over after the last expected bit is `WishlistTooLong`

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::wire::{at_eof, WireError};

/// Writes single bits into an async byte sink.
///
/// # Invariants
/// - `filled` is always < 8 between calls
/// - unused low bits of `current` are zero
#[derive(Debug)]
pub struct BitWriter<W> {
    inner: W,
    current: u8,
    filled: u8,
    written: u64,
}

impl<W: AsyncWrite + Unpin> BitWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            current: 0,
            filled: 0,
            written: 0,
        }
    }

    pub async fn write_bit(&mut self, bit: bool) -> io::Result<()> {
        if bit {
            self.current |= 0x80 >> self.filled;
        }
        self.filled += 1;
        self.written += 1;
        if self.filled == 8 {
            self.inner.write_u8(self.current).await?;
            self.current = 0;
            self.filled = 0;
        }
        Ok(())
    }

    /// Number of bits accepted so far.
    pub fn bits_written(&self) -> u64 {
        self.written
    }

    /// Flush the partial byte (zero padded), flush the sink, and hand it back.
    pub async fn finish(mut self) -> io::Result<W> {
        if self.filled > 0 {
            self.inner.write_u8(self.current).await?;
        }
        self.inner.flush().await?;
        Ok(self.inner)
    }
}

/// Reads single bits from an async byte source.
#[derive(Debug)]
pub struct BitReader<R> {
    inner: R,
    current: u8,
    remaining: u8,
    read: u64,
}

impl<R: AsyncRead + Unpin> BitReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            current: 0,
            remaining: 0,
            read: 0,
        }
    }

    pub async fn read_bit(&mut self) -> Result<bool, WireError> {
        if self.remaining == 0 {
            self.current = match self.inner.read_u8().await {
                Ok(byte) => byte,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(WireError::WishlistTooShort)
                }
                Err(e) => return Err(WireError::Io(e)),
            };
            self.remaining = 8;
        }
        self.remaining -= 1;
        self.read += 1;
        Ok(self.current & (1 << self.remaining) != 0)
    }

    /// Number of bits consumed so far.
    pub fn bits_read(&self) -> u64 {
        self.read
    }

    /// Require that the source is exhausted. Padding bits in the current
    /// byte are discarded.
    pub async fn finish(&mut self) -> Result<(), WireError> {
        self.remaining = 0;
        if at_eof(&mut self.inner).await? {
            Ok(())
        } else {
            Err(WireError::WishlistTooLong)
        }
    }
}
