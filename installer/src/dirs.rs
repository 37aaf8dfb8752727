//! Directory resolution abstraction for platform-specific paths.
//!
//! Wraps `directories-next` behind the [`BaseDirs`] trait so code that
//! resolves default locations can be tested without touching the real
//! home directory.

use std::path::PathBuf;

const APPLICATION: &str = "runtime-installer";

/// Platform directories used by the installer.
#[cfg_attr(test, mockall::automock)]
pub trait BaseDirs {
    /// The user's home directory.
    fn home_dir(&self) -> Option<PathBuf>;

    /// Directory holding `config.toml`.
    fn config_dir(&self) -> Option<PathBuf>;

    /// Directory holding installed runtimes and local metrics.
    fn data_dir(&self) -> Option<PathBuf>;
}

/// [`BaseDirs`] backed by the operating system's conventions.
#[derive(Debug, Clone)]
pub struct SystemBaseDirs {
    base: directories_next::BaseDirs,
    project: directories_next::ProjectDirs,
}

impl SystemBaseDirs {
    /// Resolve the platform directories.
    ///
    /// Returns `None` when no home directory can be determined.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use runtime_installer::dirs::{BaseDirs, SystemBaseDirs};
    ///
    /// let dirs = SystemBaseDirs::new().expect("failed to initialise directories");
    /// println!("{:?}", dirs.data_dir());
    /// ```
    #[must_use]
    pub fn new() -> Option<Self> {
        Some(Self {
            base: directories_next::BaseDirs::new()?,
            project: directories_next::ProjectDirs::from("", "", APPLICATION)?,
        })
    }
}

impl BaseDirs for SystemBaseDirs {
    fn home_dir(&self) -> Option<PathBuf> {
        Some(self.base.home_dir().to_path_buf())
    }

    fn config_dir(&self) -> Option<PathBuf> {
        Some(self.project.config_dir().to_path_buf())
    }

    fn data_dir(&self) -> Option<PathBuf> {
        Some(self.project.data_dir().to_path_buf())
    }
}
