//! Shared protocol constants for the ferry line+payload transport

// Header keywords
pub const UPLOAD: &str = "UPLOAD";
pub const DOWNLOAD: &str = "DOWNLOAD";
pub const OK: &str = "OK";
pub const ERROR: &str = "ERROR";

// Header terminator
pub const NEWLINE: u8 = b'\n';

pub const DEFAULT_BIND: &str = "0.0.0.0:12345";
pub const DEFAULT_ADDR: &str = "127.0.0.1:12345";

// Payload chunk size; also the capacity of the header buffer
pub const CHUNK_SIZE: usize = 64 * 1024;

// Longest header accepted before the terminator
pub const MAX_HEADER_LEN: usize = 4096;

// Prefix the client puts in front of downloaded file names
pub const DOWNLOAD_PREFIX: &str = "downloaded_";

// Messages carried in ERROR headers
pub mod messages {
    pub const FILE_NOT_FOUND: &str = "File not found";
    pub const INVALID_FILENAME: &str = "Invalid filename";
    pub const OPEN_FAILED: &str = "Cannot open file for writing";
}

// Centralized timeout constants shared by daemon and client
pub mod timeouts {
    use std::time::Duration;

    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5000;

    // Default idle deadline for a single read or write on the daemon (s)
    pub const IO_IDLE_SECS: u64 = 300;

    // 0 disables the deadline
    pub fn idle(secs: u64) -> Option<Duration> {
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_disables_idle_deadline() {
        assert_eq!(timeouts::idle(0), None);
        assert_eq!(timeouts::idle(7), Some(std::time::Duration::from_secs(7)));
    }

    #[test]
    fn default_addresses_share_port() {
        let port = |a: &str| a.rsplit(':').next().map(str::to_string);
        assert_eq!(port(DEFAULT_BIND), port(DEFAULT_ADDR));
    }
}
