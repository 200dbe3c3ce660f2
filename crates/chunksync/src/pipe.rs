//! In-process byte channel with explicit abort.
//!
//! A pipe is a bounded queue of write buffers between one writer and one
//! reader. A full queue stalls the writer; an empty one stalls the reader.
//!
//! The writer ends the stream in one of three ways:
//!   - `shutdown()`: clean end of stream, the reader sees EOF
//!   - `abort(reason)`: the reader gets a `ConnectionAborted` error
//!     carrying `reason`
//!   - being dropped without either: treated as an abort
//!
//! Writing after the reader is gone fails with `BrokenPipe`.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

enum Frame {
    Data(Bytes),
    Close,
    Abort(Arc<str>),
}

/// Reason carried by an aborted pipe.
#[derive(Debug, Clone, thiserror::Error)]
#[error("peer stage aborted: {0}")]
pub struct PipeAborted(pub Arc<str>);

/// Create a pipe holding at most `capacity` (minimum 1) unread write buffers.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        PipeWriter {
            tx: PollSender::new(tx),
            shut: false,
        },
        PipeReader {
            rx,
            buf: Bytes::new(),
            state: ReadState::Open,
        },
    )
}

pub struct PipeWriter {
    tx: PollSender<Frame>,
    shut: bool,
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped")
}

impl PipeWriter {
    /// Close the pipe with an error the reader will observe.
    pub async fn abort(mut self, reason: impl fmt::Display) {
        let frame = Frame::Abort(Arc::from(reason.to_string()));
        if std::future::poll_fn(|cx| self.tx.poll_reserve(cx))
            .await
            .is_ok()
        {
            let _ = self.tx.send_item(frame);
        }
        self.shut = true;
    }

    fn poll_send(&mut self, cx: &mut Context<'_>, frame: Frame) -> Poll<io::Result<()>> {
        ready!(self.tx.poll_reserve(cx)).map_err(|_| broken_pipe())?;
        self.tx.send_item(frame).map_err(|_| broken_pipe())?;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.shut {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after pipe shutdown",
            )));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        ready!(this.poll_send(cx, Frame::Data(Bytes::copy_from_slice(buf))))?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.shut {
            return Poll::Ready(Ok(()));
        }
        ready!(this.poll_send(cx, Frame::Close))?;
        this.shut = true;
        this.tx.close();
        Poll::Ready(Ok(()))
    }
}

enum ReadState {
    Open,
    Closed,
    Aborted(Arc<str>),
}

pub struct PipeReader {
    rx: mpsc::Receiver<Frame>,
    buf: Bytes,
    state: ReadState,
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.buf.is_empty() {
                let n = this.buf.len().min(out.remaining());
                out.put_slice(&this.buf.split_to(n));
                return Poll::Ready(Ok(()));
            }
            match &this.state {
                ReadState::Closed => return Poll::Ready(Ok(())),
                ReadState::Aborted(reason) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        PipeAborted(reason.clone()),
                    )))
                }
                ReadState::Open => {}
            }
            this.state = match ready!(this.rx.poll_recv(cx)) {
                Some(Frame::Data(bytes)) => {
                    this.buf = bytes;
                    ReadState::Open
                }
                Some(Frame::Close) => ReadState::Closed,
                Some(Frame::Abort(reason)) => ReadState::Aborted(reason),
                None => ReadState::Aborted(Arc::from("writer dropped without closing")),
            };
        }
    }
}
