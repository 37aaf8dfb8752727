//! Execute-bit handling for installed package binaries.
//!
//! On Unix the execute bits for user, group, and others are added to each
//! binary's existing mode. Elsewhere executability is not a file mode and
//! this is a no-op. Failures never abort the run; they come back as
//! warnings.

use crate::observer::InstallWarning;
use std::path::PathBuf;

/// Make every path in `binaries` executable.
///
/// Returns one [`InstallWarning`] of kind
/// [`PermissionDenied`](crate::error::ErrorKind::PermissionDenied) for each
/// file that could not be changed, in input order.
#[cfg(unix)]
#[must_use]
pub fn mark_executable(binaries: &[PathBuf]) -> Vec<InstallWarning> {
    use crate::error::InstallerError;
    use log::debug;
    use std::os::unix::fs::PermissionsExt;

    binaries
        .iter()
        .filter_map(|path| {
            let result = std::fs::metadata(path).and_then(|metadata| {
                let mode = metadata.permissions().mode() | 0o111;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            });
            match result {
                Ok(()) => {
                    debug!("marked {} executable", path.display());
                    None
                }
                Err(err) => Some(InstallWarning::from(&InstallerError::PermissionDenied {
                    path: path.clone(),
                    reason: err.to_string(),
                })),
            }
        })
        .collect()
}

/// Make every path in `binaries` executable.
///
/// Executability is not a file mode on this platform, so nothing is done.
#[cfg(not(unix))]
#[must_use]
pub fn mark_executable(binaries: &[PathBuf]) -> Vec<InstallWarning> {
    let _ = binaries;
    Vec::new()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::os::unix::fs::PermissionsExt;

    fn mode_of(path: &std::path::Path) -> u32 {
        std::fs::metadata(path).expect("metadata").permissions().mode() & 0o777
    }

    #[test]
    fn adds_execute_bits_to_existing_mode() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let binary = temp_dir.path().join("server");
        std::fs::write(&binary, b"#!/bin/sh\n").expect("write binary");
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o640))
            .expect("set mode");

        let warnings = mark_executable(std::slice::from_ref(&binary));
        assert!(warnings.is_empty());
        assert_eq!(mode_of(&binary), 0o751);
    }

    #[test]
    fn missing_binary_yields_warning_and_continues() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let missing = temp_dir.path().join("absent");
        let present = temp_dir.path().join("present");
        std::fs::write(&present, b"x").expect("write binary");
        std::fs::set_permissions(&present, std::fs::Permissions::from_mode(0o644))
            .expect("set mode");

        let warnings = mark_executable(&[missing.clone(), present.clone()]);
        assert_eq!(warnings.len(), 1);
        let warning = warnings.first().expect("one warning");
        assert_eq!(warning.kind, ErrorKind::PermissionDenied);
        assert!(warning.message.contains("absent"));
        assert_eq!(mode_of(&present), 0o755);
    }
}
