//! The durable "installed" marker and the per-root run guard.
//!
//! [`InstallLockMarker`] is an existence-only file: when present, every
//! selected package has been installed and later runs do nothing.
//! [`RunGuard`] serialises runs against one install root with an exclusive
//! advisory lock so two processes never install concurrently.

use crate::error::{InstallerError, Result};
use fs2::FileExt;
use log::debug;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Marker file name inside the install root.
pub const MARKER_FILE_NAME: &str = "install.lock";

/// Run guard file name inside the install root.
pub const GUARD_FILE_NAME: &str = "install.lock.guard";

/// The "dependencies already installed" marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLockMarker {
    path: PathBuf,
}

impl InstallLockMarker {
    /// The marker for `install_root`.
    #[must_use]
    pub fn in_root(install_root: &Path) -> Self {
        Self {
            path: install_root.join(MARKER_FILE_NAME),
        }
    }

    /// Location of the marker file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the marker is present.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Create the marker. Creating an existing marker is not an error.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn create(&self) -> Result<()> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;
        debug!("wrote install marker {}", self.path.display());
        Ok(())
    }
}

/// An exclusive lock on an install root, released on drop.
#[derive(Debug)]
pub struct RunGuard {
    file: File,
    path: PathBuf,
}

impl RunGuard {
    /// Block until the install root at `install_root` can be locked.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::LockFailed`] if the guard file cannot be
    /// opened or locked.
    pub fn acquire(install_root: &Path) -> Result<Self> {
        let path = install_root.join(GUARD_FILE_NAME);
        let lock_failed = |source| InstallerError::LockFailed {
            path: path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(lock_failed)?;
        file.lock_exclusive().map_err(lock_failed)?;
        debug!("acquired run guard {}", path.display());
        Ok(Self { file, path })
    }

    /// Location of the guard file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!("failed to release run guard {}: {err}", self.path.display());
        }
    }
}
