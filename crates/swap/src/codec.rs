//! On-disk layout of swapped cowns.
//!
//! One file per cown, named `<hex-cown-id>.cown`, under a process-local
//! directory created on first use with owner-only permissions. The file
//! contents are whatever the payload's [`Swappable`](crate::Swappable)
//! implementation produced, verbatim.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use boc_runtime::CownId;
use tracing::debug;

use crate::error::{SwapError, SwapResult};

/// File extension of swapped cown payloads.
pub const SWAP_FILE_EXT: &str = "cown";

/// Resolves and maintains the swap directory.
pub struct Codec {
    dir: PathBuf,
}

impl Codec {
    /// Open (and create, if needed) the swap directory.
    pub fn open(dir: PathBuf) -> SwapResult<Self> {
        fs::create_dir_all(&dir).map_err(|source| SwapError::Directory {
            path: dir.clone(),
            source,
        })?;
        restrict_permissions(&dir).map_err(|source| SwapError::Directory {
            path: dir.clone(),
            source,
        })?;
        debug!("swap directory ready at {}", dir.display());
        Ok(Self { dir })
    }

    /// The default process-local swap directory.
    pub fn default_dir() -> PathBuf {
        env::temp_dir().join("swap-engine").join("cowns")
    }

    /// The directory swap files live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the swap file for `id`.
    pub fn path_for(&self, id: CownId) -> PathBuf {
        self.dir.join(format!("{id}.{SWAP_FILE_EXT}"))
    }

    /// Remove the swap file for `id`, if present.
    pub fn remove(&self, id: CownId) -> SwapResult<()> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SwapError::RemoveFile { path, source }),
        }
    }

    /// Remove every swap file in the directory. Not required for
    /// correctness; offered for shutdown housekeeping.
    pub fn clear(&self) -> SwapResult<()> {
        let entries = fs::read_dir(&self.dir).map_err(|source| SwapError::Directory {
            path: self.dir.clone(),
            source,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(SWAP_FILE_EXT) {
                fs::remove_file(&path)
                    .map_err(|source| SwapError::RemoveFile { path, source })?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_permissions(_dir: &Path) -> io::Result<()> {
    Ok(())
}
