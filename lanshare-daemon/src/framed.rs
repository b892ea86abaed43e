//! Buffered frame reader over a byte stream.
//!
//! Reads from the socket in blocks, so after a frame is decoded the buffer may already hold
//! the first bytes of the file payload. `into_payload` hands those back ahead of the stream.

use std::io::Cursor;

use lanshare_core::wire::{decode_frame, leading_delimiters, FrameDecodeError};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, Chain};

const READ_BLOCK: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("connection closed before a full frame arrived")]
    Closed,
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Read until one whole frame is buffered, decode it and drop its bytes from the buffer.
    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<T, FrameError> {
        let mut block = [0u8; READ_BLOCK];
        loop {
            match decode_frame::<T>(&self.buf) {
                Ok((msg, n)) => {
                    self.buf.drain(..n);
                    return Ok(msg);
                }
                Err(FrameDecodeError::NeedMore) => {}
                Err(e) => return Err(e.into()),
            }
            let n = self.inner.read(&mut block).await?;
            if n == 0 {
                return Err(FrameError::Closed);
            }
            self.buf.extend_from_slice(&block[..n]);
        }
    }

    /// Remaining stream: buffered leftovers first, then the rest of the inner reader.
    pub fn into_payload(self) -> Chain<Cursor<Vec<u8>>, R> {
        Cursor::new(self.buf).chain(self.inner)
    }
}

/// Consume delimiter whitespace at the front of `reader`. Stops at the first payload byte or EOF.
pub async fn skip_delimiters<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<usize> {
    let mut skipped = 0;
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(skipped);
        }
        let n = leading_delimiters(buf);
        let more = n == buf.len();
        reader.consume(n);
        skipped += n;
        if !more {
            return Ok(skipped);
        }
    }
}
