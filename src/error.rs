//! Typed failures of the header/payload protocol

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed inside a header ({0} bytes without a newline)")]
    TruncatedHeader(usize),
    #[error("header exceeds {0} bytes without a newline")]
    HeaderTooLong(usize),
    #[error("connection closed with {remaining} of {expected} payload bytes outstanding")]
    PayloadTruncated { expected: u64, remaining: u64 },
    #[error("source changed during transfer: advertised {advertised} bytes, found {actual}")]
    SourceChanged { advertised: u64, actual: u64 },
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("rejected filename {name:?}: {reason}")]
    RejectedFilename { name: String, reason: &'static str },
    #[error("cannot open local file {path}: {source}")]
    LocalFile { path: String, source: std::io::Error },
    #[error("filename {0:?} cannot be sent (empty or contains whitespace)")]
    UnrepresentableFilename(String),
    #[error("malformed response header: {0:?}")]
    BadResponse(String),
    #[error("connection closed before a response header")]
    NoResponse,
    #[error("server error: {0}")]
    Remote(String),
    #[error("server refused upload: {0}")]
    UploadRejected(String),
    #[error("{what} timed out after {after:?}")]
    Timeout { what: &'static str, after: Duration },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Failures after which the stream position is unknown and the
    /// connection must not carry another header.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::FileNotFound(_)
                | ProtocolError::LocalFile { .. }
                | ProtocolError::Remote(_)
                | ProtocolError::UnrepresentableFilename(_)
        )
    }
}

/// Run `fut` under an optional deadline.
pub async fn timed<F, T>(what: &'static str, deadline: Option<Duration>, fut: F) -> Result<T, ProtocolError>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    match deadline {
        Some(after) => match tokio::time::timeout(after, fut).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(ProtocolError::Timeout { what, after }),
        },
        None => Ok(fut.await?),
    }
}
