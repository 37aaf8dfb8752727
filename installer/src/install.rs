//! Atomic placement of verified archives.
//!
//! An archive is extracted into a hidden sibling of its destination and
//! only renamed into place once extraction has fully succeeded. An existing
//! destination is moved aside first and removed afterwards, so the
//! destination path always holds either the complete old tree or the
//! complete new one.

use crate::artefact::extraction::{ArchiveExtractor, ExtractionError};
use crate::download::DownloadResult;
use crate::error::{InstallerError, Result};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

const PARTIAL_SUFFIX: &str = ".partial";
const PREVIOUS_SUFFIX: &str = ".previous";

/// Record of one completed package installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    /// The installed package's id.
    pub package_id: String,
    /// Where the package now lives.
    pub destination: PathBuf,
    /// Extracted files, relative to `destination`.
    pub files: Vec<PathBuf>,
    /// Absolute paths of the package's executables.
    pub binaries: Vec<PathBuf>,
}

/// Extracts downloaded archives into the install root.
pub struct Installer<'a> {
    extractor: &'a dyn ArchiveExtractor,
    install_root: PathBuf,
}

impl<'a> Installer<'a> {
    /// Create an installer placing packages beneath `install_root`.
    #[must_use]
    pub fn new(extractor: &'a dyn ArchiveExtractor, install_root: impl Into<PathBuf>) -> Self {
        Self {
            extractor,
            install_root: install_root.into(),
        }
    }

    /// Extract `download` into its destination, replacing any previous tree.
    ///
    /// The staged archive is deleted after a successful install.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::ChecksumMismatch`] for an unverified
    /// download and [`InstallerError::ExtractionFailed`] when extraction or
    /// the final move fails. On error the destination is unchanged.
    pub fn install(&self, download: &DownloadResult) -> Result<InstalledPackage> {
        let package = &download.package;
        if !download.verified {
            return Err(InstallerError::ChecksumMismatch {
                package: package.description.clone(),
                expected: package.checksum.to_string(),
                actual: "unverified".to_owned(),
            });
        }
        let extraction_failed = |reason: String| InstallerError::ExtractionFailed {
            package: package.description.clone(),
            reason,
        };
        let format = package
            .archive_format()
            .ok_or_else(|| extraction_failed(format!("unknown archive format for {}", package.url)))?;

        let destination = package.destination_in(&self.install_root);
        let (parent, name) = split_destination(&destination)
            .ok_or_else(|| extraction_failed("destination has no parent directory".to_owned()))?;
        fs::create_dir_all(parent).map_err(|e| extraction_failed(e.to_string()))?;
        remove_leftovers(parent, &name);

        let staging = tempfile::Builder::new()
            .prefix(&format!(".{name}{PARTIAL_SUFFIX}"))
            .tempdir_in(parent)
            .map_err(|e| extraction_failed(e.to_string()))?;
        let files = self
            .extractor
            .extract(&download.archive_path, format, staging.path())
            .map_err(|e| extraction_failed(describe(&e)))?;

        swap_into_place(staging.path(), &destination, &name)
            .map_err(|e| extraction_failed(e.to_string()))?;
        debug!("installed {} into {}", package.id, destination.display());

        if let Err(err) = fs::remove_file(&download.archive_path) {
            debug!("could not remove {}: {err}", download.archive_path.display());
        }

        Ok(InstalledPackage {
            package_id: package.id.clone(),
            binaries: package.binaries_in(&self.install_root),
            destination,
            files,
        })
    }
}

fn split_destination(destination: &Path) -> Option<(&Path, String)> {
    let parent = destination.parent()?;
    let name = destination.file_name()?.to_string_lossy().into_owned();
    Some((parent, name))
}

fn previous_path(destination: &Path, name: &str) -> PathBuf {
    destination.with_file_name(format!(".{name}{PREVIOUS_SUFFIX}"))
}

/// Remove partial extractions and set-aside trees left by a killed run.
fn remove_leftovers(parent: &Path, name: &str) {
    let partial_prefix = format!(".{name}{PARTIAL_SUFFIX}");
    let previous_name = format!(".{name}{PREVIOUS_SUFFIX}");
    let Ok(entries) = fs::read_dir(parent) else {
        return;
    };
    for entry in entries.filter_map(std::result::Result::ok) {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if file_name.starts_with(&partial_prefix) || file_name == previous_name {
            let path = entry.path();
            debug!("removing leftover {}", path.display());
            if let Err(err) = fs::remove_dir_all(&path) {
                warn!("could not remove leftover {}: {err}", path.display());
            }
        }
    }
}

fn swap_into_place(staged: &Path, destination: &Path, name: &str) -> std::io::Result<()> {
    if !destination.exists() {
        return fs::rename(staged, destination);
    }

    let previous = previous_path(destination, name);
    fs::rename(destination, &previous)?;
    if let Err(err) = fs::rename(staged, destination) {
        if let Err(restore_err) = fs::rename(&previous, destination) {
            warn!(
                "could not restore {} after failed install: {restore_err}",
                destination.display()
            );
        }
        return Err(err);
    }
    if let Err(err) = fs::remove_dir_all(&previous) {
        warn!("could not remove replaced tree {}: {err}", previous.display());
    }
    Ok(())
}

fn describe(err: &ExtractionError) -> String {
    match err {
        ExtractionError::PathTraversal { path } => {
            format!("archive entry '{path}' escapes the destination")
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "install_tests.rs"]
mod tests;
