//! Shared CLI helpers and small reusable Clap fragments

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ServerConfig;
use crate::protocol::DEFAULT_ADDR;

/// Daemon options used by ferryd; unset flags fall back to the config file
#[derive(Clone, Debug, Default, Parser)]
#[command(author, version, about = "ferryd - store and serve whole files over TCP")]
pub struct DaemonOpts {
    /// TOML config file (default: ~/.config/ferry/ferryd.toml if present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address (host:port)
    #[arg(long)]
    pub bind: Option<String>,

    /// Storage root directory (created if missing)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Close every connection after one command
    #[arg(long)]
    pub one_shot: bool,

    /// Acknowledge completed uploads with an OK header
    #[arg(long)]
    pub upload_ack: bool,

    /// Per read/write deadline in seconds (0 = none)
    #[arg(long)]
    pub io_timeout_secs: Option<u64>,

    /// Payload chunk size in bytes
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Write JSONL log entries to file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

impl DaemonOpts {
    /// Flags given on the command line win over the file.
    pub fn apply(&self, mut cfg: ServerConfig) -> ServerConfig {
        if let Some(ref b) = self.bind {
            cfg.bind = b.clone();
        }
        if let Some(ref r) = self.root {
            cfg.root = r.clone();
        }
        cfg.one_shot |= self.one_shot;
        cfg.upload_ack |= self.upload_ack;
        if let Some(t) = self.io_timeout_secs {
            cfg.io_timeout_secs = t;
        }
        if let Some(c) = self.chunk_size {
            cfg.chunk_size = c;
        }
        if let Some(ref l) = self.log_file {
            cfg.log_file = Some(l.clone());
        }
        cfg
    }
}

/// Client options used by ferry
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "ferry - upload and download files to a ferryd server")]
pub struct ClientOpts {
    /// Server address (host:port)
    #[arg(long, default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Where downloaded_<name> files are written
    #[arg(long, default_value = ".")]
    pub download_dir: PathBuf,

    /// Expect an OK header after each upload (server must run with --upload-ack)
    #[arg(long)]
    pub upload_ack: bool,

    /// Per read/write deadline in seconds (0 = none)
    #[arg(long, default_value_t = 0)]
    pub timeout_secs: u64,

    /// Hide progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Run one action and exit; without it the interactive menu starts
    #[command(subcommand)]
    pub action: Option<Action>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Action {
    /// Upload local files (stored under their base name)
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Download files by name
    Download {
        #[arg(required = true)]
        names: Vec<String>,
    },
}
