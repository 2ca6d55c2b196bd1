//! Exact-length payload movement between a stream and a file.

use std::time::Duration;

use indicatif::ProgressBar;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{timed, ProtocolError};
use crate::protocol::CHUNK_SIZE;

#[derive(Clone, Debug)]
pub struct TransferOpts {
    /// Largest single read from a file source.
    pub chunk_size: usize,
    /// Deadline for each network read or write.
    pub idle_timeout: Option<Duration>,
}

impl Default for TransferOpts {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            idle_timeout: None,
        }
    }
}

/// Bytes still owed by one payload phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferState {
    pub expected: u64,
    pub remaining: u64,
}

impl TransferState {
    pub fn new(expected: u64) -> Self {
        Self {
            expected,
            remaining: expected,
        }
    }

    pub fn done(&self) -> u64 {
        self.expected - self.remaining
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// How many of `available` bytes belong to this payload.
    fn take(&self, available: usize) -> usize {
        usize::try_from(self.remaining).map_or(available, |r| r.min(available))
    }

    fn advance(&mut self, n: usize) {
        self.remaining -= n as u64;
    }

    fn truncated(&self) -> ProtocolError {
        ProtocolError::PayloadTruncated {
            expected: self.expected,
            remaining: self.remaining,
        }
    }
}

/// Copy exactly `size` bytes from `reader` into `sink`.
///
/// Whatever `reader` already buffers is written first; anything buffered past
/// the payload stays in `reader` for the next header.
pub async fn receive_payload<R, W>(
    reader: &mut R,
    sink: &mut W,
    size: u64,
    opts: &TransferOpts,
    progress: Option<&ProgressBar>,
) -> Result<u64, ProtocolError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut state = TransferState::new(size);
    while !state.is_complete() {
        let available = timed("payload read", opts.idle_timeout, reader.fill_buf()).await?;
        if available.is_empty() {
            sink.flush().await?;
            return Err(state.truncated());
        }
        let n = state.take(available.len());
        sink.write_all(&available[..n]).await?;
        reader.consume(n);
        state.advance(n);

        if let Some(pb) = progress {
            pb.set_position(state.done());
        }
    }
    sink.flush().await?;
    Ok(state.expected)
}

/// Stream `source` to `stream`, which must yield exactly `advertised` bytes.
pub async fn send_payload<S, W>(
    source: &mut S,
    stream: &mut W,
    advertised: u64,
    opts: &TransferOpts,
    progress: Option<&ProgressBar>,
) -> Result<u64, ProtocolError>
where
    S: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut state = TransferState::new(advertised);
    let mut buffer = vec![0u8; opts.chunk_size.max(1)];
    loop {
        let n = source.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        if n as u64 > state.remaining {
            return Err(ProtocolError::SourceChanged {
                advertised,
                actual: state.done() + n as u64,
            });
        }
        timed("payload write", opts.idle_timeout, stream.write_all(&buffer[..n])).await?;
        state.advance(n);

        if let Some(pb) = progress {
            pb.set_position(state.done());
        }
    }
    if !state.is_complete() {
        return Err(ProtocolError::SourceChanged {
            advertised,
            actual: state.done(),
        });
    }
    timed("payload flush", opts.idle_timeout, stream.flush()).await?;
    Ok(advertised)
}
