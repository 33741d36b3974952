//! Async variants of the hashing adapters.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use digest::{Digest, Output};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A [`tokio::io::AsyncRead`] adapter that computes a digest of all bytes read
/// through it.
pub struct HashingReader<R, D: Digest> {
    reader: R,
    hasher: D,
}

impl<R, D: Digest> HashingReader<R, D> {
    /// Wraps the given reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            hasher: D::new(),
        }
    }

    /// Returns the inner reader and the digest of everything read.
    pub fn finalize(self) -> (R, Output<D>) {
        (self.reader, self.hasher.finalize())
    }
}

impl<R: AsyncRead + Unpin, D: Digest + Unpin> AsyncRead for HashingReader<R, D> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let previously_filled = buf.filled().len();
        match Pin::new(&mut this.reader).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                this.hasher.update(&buf.filled()[previously_filled..]);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// A [`tokio::io::AsyncWrite`] adapter that computes a digest of all bytes
/// written through it.
pub struct HashingWriter<W, D: Digest> {
    writer: W,
    hasher: D,
}

impl<W, D: Digest> HashingWriter<W, D> {
    /// Wraps the given writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: D::new(),
        }
    }

    /// Returns the inner writer and the digest of everything written.
    pub fn finalize(self) -> (W, Output<D>) {
        (self.writer, self.hasher.finalize())
    }
}

impl<W: AsyncWrite + Unpin, D: Digest + Unpin> AsyncWrite for HashingWriter<W, D> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.writer).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                this.hasher.update(&buf[..written]);
                Poll::Ready(Ok(written))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }
}
