//! Storage root on the daemon side.
//!
//! Filenames arrive from the network unsanitized. Every name is confined to a
//! single normal path component directly under the root:
//! 1. Rejecting empty names, `.`, `..` and anything with a separator
//! 2. Rejecting NUL bytes
//! 3. On Windows, rejecting ':' (ADS defense)
//! 4. Rejecting existing entries whose canonical path escapes the root

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};
use tokio::fs::{File, OpenOptions};

use crate::error::ProtocolError;

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Create the root if needed and canonicalize it.
    pub fn open(root: &Path) -> Result<Self> {
        ensure_dir_exists(root)?;
        let root = std::fs::canonicalize(root)
            .with_context(|| format!("Failed to canonicalize storage root: {}", root.display()))?;
        if !root.is_dir() {
            anyhow::bail!("Storage root is not a directory: {}", root.display());
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a received filename to a path under the root.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ProtocolError> {
        let reject = |reason| ProtocolError::RejectedFilename {
            name: name.to_string(),
            reason,
        };
        if name.is_empty() {
            return Err(reject("empty name"));
        }
        if name.contains('\0') {
            return Err(reject("contains NUL byte"));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(reject("contains a path separator"));
        }
        #[cfg(windows)]
        if name.contains(':') {
            return Err(reject("contains colon (potential ADS attack)"));
        }
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(reject("not a plain file name")),
        }

        let joined = self.root.join(name);
        // Existing entries may be symlinks; follow them and re-check
        if let Ok(canon) = std::fs::canonicalize(&joined) {
            if !canon.starts_with(&self.root) {
                return Err(reject("escapes storage root via symlink"));
            }
        }
        Ok(joined)
    }

    /// Create or truncate `name` for an upload.
    pub async fn create(&self, name: &str) -> Result<(PathBuf, File), ProtocolError> {
        let path = self.resolve(name)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;
        Ok((path, file))
    }

    /// Open `name` for a download and measure it.
    pub async fn open_read(&self, name: &str) -> Result<(File, u64), ProtocolError> {
        let path = self.resolve(name)?;
        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProtocolError::FileNotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let md = file.metadata().await?;
        if !md.is_file() {
            return Err(ProtocolError::FileNotFound(name.to_string()));
        }
        Ok((file, md.len()))
    }
}

/// Create directory with parent creation
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }
    Ok(())
}
