//! Header lines: client commands and server responses

use crate::error::ProtocolError;
use crate::frame::Header;
use crate::protocol::{DOWNLOAD, ERROR, OK, UPLOAD};

/// A decoded client header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `UPLOAD <filename> <size>`; exactly `size` payload bytes follow.
    Upload { filename: String, size: u64 },
    /// `DOWNLOAD <filename>`
    Download { filename: String },
    /// Anything that does not parse, kept verbatim for logging.
    Unknown { raw: String },
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let tokens: Vec<&str> = line.split_ascii_whitespace().collect();
        match tokens.as_slice() {
            [UPLOAD, filename, size] => match parse_size(size) {
                Some(size) => Command::Upload {
                    filename: (*filename).to_string(),
                    size,
                },
                None => Command::Unknown { raw: line.to_string() },
            },
            [DOWNLOAD, filename] => Command::Download {
                filename: (*filename).to_string(),
            },
            _ => Command::Unknown { raw: line.to_string() },
        }
    }

    /// Decode a header off the wire. A line that was not valid UTF-8 is
    /// `Unknown`, so two distinct byte strings never map to one filename.
    pub fn from_header(header: &Header) -> Self {
        if header.is_lossy() {
            return Command::Unknown {
                raw: header.as_str().to_string(),
            };
        }
        Self::parse(header.as_str())
    }

    /// Wire form including the terminator.
    pub fn header_line(&self) -> String {
        match self {
            Command::Upload { filename, size } => format!("{UPLOAD} {filename} {size}\n"),
            Command::Download { filename } => format!("{DOWNLOAD} {filename}\n"),
            Command::Unknown { raw } => format!("{raw}\n"),
        }
    }
}

/// A decoded server header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok { size: u64 },
    Error { message: String },
}

impl Response {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let trimmed = line.trim_start();
        let (status, rest) = trimmed
            .split_once(|c: char| c.is_ascii_whitespace())
            .unwrap_or((trimmed, ""));
        match status {
            OK => {
                let mut parts = rest.split_ascii_whitespace();
                match (parts.next().and_then(parse_size), parts.next()) {
                    (Some(size), None) => Ok(Response::Ok { size }),
                    _ => Err(ProtocolError::BadResponse(line.to_string())),
                }
            }
            ERROR => Ok(Response::Error {
                message: rest.trim().to_string(),
            }),
            _ => Err(ProtocolError::BadResponse(line.to_string())),
        }
    }

    pub fn header_line(&self) -> String {
        match self {
            Response::Ok { size } => format!("{OK} {size}\n"),
            Response::Error { message } => format!("{ERROR} {message}\n"),
        }
    }
}

// Digits only: u64::from_str would also take a leading '+'
fn parse_size(token: &str) -> Option<u64> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// A filename can only travel as a single whitespace-free token.
pub fn validate_token(name: &str) -> Result<(), ProtocolError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ProtocolError::UnrepresentableFilename(name.to_string()));
    }
    Ok(())
}
