//! Daemon configuration: TOML file, then command-line overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{timeouts, CHUNK_SIZE, DEFAULT_BIND, MAX_HEADER_LEN};
use crate::transfer::TransferOpts;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address (host:port)
    pub bind: String,
    /// Directory uploads are stored in and downloads are served from
    pub root: PathBuf,
    /// Close each connection after its first command
    pub one_shot: bool,
    /// Answer a completed upload with `OK <size>`
    pub upload_ack: bool,
    /// Per read/write deadline in seconds (0 = wait forever)
    pub io_timeout_secs: u64,
    /// Payload chunk size in bytes
    pub chunk_size: usize,
    /// Longest accepted header in bytes
    pub max_header_len: usize,
    /// JSONL event log
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            root: PathBuf::from("./server_storage"),
            one_shot: false,
            upload_ack: false,
            io_timeout_secs: timeouts::IO_IDLE_SECS,
            chunk_size: CHUNK_SIZE,
            max_header_len: MAX_HEADER_LEN,
            log_file: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&data).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml(data: &str) -> Result<Self> {
        let cfg: ServerConfig = toml::from_str(data)?;
        Ok(cfg)
    }

    /// Explicit file, else the default location if present, else defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(p) => Self::load(p),
            None => {
                let p = default_config_path();
                if p.is_file() {
                    Self::load(&p)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be positive");
        }
        if self.max_header_len < 64 {
            anyhow::bail!("max_header_len must be at least 64 bytes");
        }
        if self.bind.trim().is_empty() {
            anyhow::bail!("bind address must not be empty");
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        timeouts::idle(self.io_timeout_secs)
    }

    pub fn transfer_opts(&self) -> TransferOpts {
        TransferOpts {
            chunk_size: self.chunk_size,
            idle_timeout: self.io_timeout(),
        }
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("Ferry");
        }
    }
    // Unix-like default
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("ferry");
    }
    PathBuf::from(".ferry")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("ferryd.toml")
}
