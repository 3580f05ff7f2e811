//! Async frame transport helpers
//!
//! Thin wrappers that move whole messages across an `AsyncRead`/`AsyncWrite`
//! pair using the pure codec. Both sides of the protocol share these so the
//! framing behavior cannot drift between broker and worker.

use crate::codec::{self, CodecError, FrameDecoder};
use crate::WireMessage;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Transport-level failure while reading or writing frames.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream in the middle of a frame.
    #[error("stream closed mid-frame with {0} bytes buffered")]
    TruncatedStream(usize),
}

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Reads whole messages off an async byte stream.
///
/// `Ok(None)` is a clean end-of-stream at a frame boundary; an EOF inside a
/// frame is reported as [`TransportError::TruncatedStream`].
pub struct FramedReader<R> {
    inner: R,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
        }
    }

    /// Read the next complete message, pulling transport bytes as needed.
    pub async fn next_message(&mut self) -> Result<Option<WireMessage>, TransportError> {
        loop {
            if let Some(message) = self.decoder.next_message()? {
                return Ok(Some(message));
            }

            let mut chunk = [0u8; READ_CHUNK_BYTES];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return if self.decoder.buffered() == 0 {
                    Ok(None)
                } else {
                    Err(TransportError::TruncatedStream(self.decoder.buffered()))
                };
            }
            self.decoder.extend(&chunk[..n]);
        }
    }
}

/// Encode and write one message, flushing so it reaches the peer promptly.
///
/// Callers that share a writer between tasks must serialize access; a frame
/// interleaved with another write is corruption on the receiving side.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &WireMessage,
) -> Result<(), TransportError> {
    let frame = codec::encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
