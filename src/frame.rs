//! Newline-delimited header framing over a buffered stream.
//!
//! The reader owns the only buffer on the read side of a connection. A header
//! read may pull payload bytes into that buffer; they stay there and are the
//! first bytes the payload phase sees through the `AsyncBufRead` impl.

use std::io;
use std::pin::Pin;
use std::ops::Deref;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};

use crate::error::{timed, ProtocolError};
use crate::protocol::{CHUNK_SIZE, MAX_HEADER_LEN, NEWLINE};

pub struct FrameReader<R> {
    inner: BufReader<R>,
    max_header: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(CHUNK_SIZE, inner)
    }

    /// `capacity` bounds a single read from the stream.
    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        Self {
            inner: BufReader::with_capacity(capacity.max(1), inner),
            max_header: MAX_HEADER_LEN,
        }
    }

    pub fn with_max_header(mut self, max_header: usize) -> Self {
        self.max_header = max_header;
        self
    }

    /// Read one header line without its terminator.
    ///
    /// Returns `Ok(None)` when the peer closed before sending any byte of a
    /// new header.
    pub async fn read_header(&mut self) -> Result<Option<Header>, ProtocolError> {
        self.read_header_timed(None, None).await
    }

    /// Like [`read_header`](Self::read_header) with two deadlines. `wait`
    /// bounds the time until the first byte of the header is available and
    /// `idle` bounds every later refill of the buffer.
    pub async fn read_header_timed(
        &mut self,
        wait: Option<Duration>,
        idle: Option<Duration>,
    ) -> Result<Option<Header>, ProtocolError> {
        let mut line = Vec::new();
        loop {
            let deadline = if line.is_empty() && self.inner.buffer().is_empty() {
                wait
            } else {
                idle
            };
            let available = timed("header read", deadline, self.inner.fill_buf()).await?;
            if available.is_empty() {
                if line.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::TruncatedHeader(line.len()));
            }
            match available.iter().position(|&b| b == NEWLINE) {
                Some(pos) => {
                    line.extend_from_slice(&available[..pos]);
                    self.inner.consume(pos + 1);
                    if line.len() > self.max_header {
                        return Err(ProtocolError::HeaderTooLong(self.max_header));
                    }
                    break;
                }
                None => {
                    let n = available.len();
                    line.extend_from_slice(available);
                    self.inner.consume(n);
                    if line.len() > self.max_header {
                        return Err(ProtocolError::HeaderTooLong(self.max_header));
                    }
                }
            }
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(Header::decode(line)))
    }

    /// Bytes already read from the stream but not yet consumed.
    pub fn carry_over(&self) -> &[u8] {
        self.inner.buffer()
    }
}

/// One header line, terminator stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    text: String,
    lossy: bool,
}

impl Header {
    fn decode(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => Self { text, lossy: false },
            Err(e) => Self {
                text: String::from_utf8_lossy(e.as_bytes()).into_owned(),
                lossy: true,
            },
        }
    }

    /// The raw bytes were not valid UTF-8; the text is a lossy decode and
    /// must not be used as a name.
    pub fn is_lossy(&self) -> bool {
        self.lossy
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl Deref for Header {
    type Target = str;

    fn deref(&self) -> &str {
        &self.text
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for FrameReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<R: AsyncRead + Unpin> AsyncBufRead for FrameReader<R> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().inner).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.get_mut().inner).consume(amt)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ChunkedReader;
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn keeps_bytes_past_the_newline() {
        let mut reader = FrameReader::new(ChunkedReader::new([b"UPLOAD a 5\nhello".to_vec()]));
        assert_eq!(reader.read_header().await.unwrap().as_deref(), Some("UPLOAD a 5"));
        assert_eq!(reader.carry_over(), b"hello");
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"hello");
    }

    #[tokio::test]
    async fn header_split_across_reads() {
        let data = b"DOWNLOAD report.txt\nNEXT\n";
        for at in 0..=data.len() {
            let mut reader = FrameReader::new(ChunkedReader::split_at(data, at));
            assert_eq!(
                reader.read_header().await.unwrap().as_deref(),
                Some("DOWNLOAD report.txt"),
                "split at {at}"
            );
            assert_eq!(reader.read_header().await.unwrap().as_deref(), Some("NEXT"));
            assert_eq!(reader.read_header().await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn one_byte_at_a_time() {
        let mut reader = FrameReader::new(ChunkedReader::bytewise(b"OK 13\r\n"));
        assert_eq!(reader.read_header().await.unwrap().as_deref(), Some("OK 13"));
    }

    #[tokio::test]
    async fn clean_eof_is_not_an_error() {
        let mut reader = FrameReader::new(ChunkedReader::new(Vec::<Vec<u8>>::new()));
        assert_eq!(reader.read_header().await.unwrap(), None);
    }

    #[tokio::test]
    async fn eof_inside_header_is_truncation() {
        let mut reader = FrameReader::new(ChunkedReader::new([b"UPLOAD a".to_vec()]));
        match reader.read_header().await {
            Err(ProtocolError::TruncatedHeader(8)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_header_is_rejected() {
        let data = vec![b'A'; 100];
        let mut reader = FrameReader::with_capacity(16, ChunkedReader::new([data])).with_max_header(32);
        assert!(matches!(
            reader.read_header().await,
            Err(ProtocolError::HeaderTooLong(32))
        ));
    }

    #[tokio::test]
    async fn small_buffer_still_frames_long_header() {
        let line = format!("UPLOAD {} 1\nX", "n".repeat(200));
        let mut reader = FrameReader::with_capacity(7, ChunkedReader::new([line.into_bytes()]));
        let header = reader.read_header().await.unwrap().unwrap();
        assert!(header.starts_with("UPLOAD nnn"));
        assert!(header.ends_with(" 1"));
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"X");
    }

    #[tokio::test]
    async fn invalid_utf8_is_flagged() {
        let mut reader = FrameReader::new(ChunkedReader::new([b"UPLOAD \xff 3\nDOWNLOAD ok\n".to_vec()]));
        let bad = reader.read_header().await.unwrap().unwrap();
        assert!(bad.is_lossy());
        assert_eq!(bad.as_str(), "UPLOAD \u{fffd} 3");
        let good = reader.read_header().await.unwrap().unwrap();
        assert!(!good.is_lossy());
        assert_eq!(&*good, "DOWNLOAD ok");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_deadline_only_applies_before_first_byte() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx);

        // Quiet between headers: no deadline when `wait` is None
        let send = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(600)).await;
            tx.write_all(b"DOWNLOAD a\nUPL").await.unwrap();
            tx
        });
        let idle = Some(Duration::from_secs(1));
        let header = reader.read_header_timed(None, idle).await.unwrap().unwrap();
        assert_eq!(&*header, "DOWNLOAD a");
        let _tx = send.await.unwrap();

        // A started header that stalls hits the idle deadline
        match reader.read_header_timed(None, idle).await {
            Err(ProtocolError::Timeout { what: "header read", .. }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
