//! Error types for the runtime installer.
//!
//! This module defines the semantic error taxonomy shared by every stage of
//! the acquisition pipeline. Each variant carries enough context to attribute
//! a failure to one package, and maps to a stable [`ErrorKind`] used for
//! telemetry.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The actionable message shown to users when a run cannot complete.
pub const RECOVERY_HINT: &str =
    "re-download the full offline package from the releases page and install it manually";

/// Errors that can occur while acquiring and installing runtime packages.
#[derive(Debug, Error)]
pub enum InstallerError {
    /// The host platform is outside the supported matrix.
    #[error("unsupported platform: {reason}")]
    UnsupportedPlatform {
        /// Description of why the platform was rejected.
        reason: String,
    },

    /// A network operation failed for one package.
    #[error("failed to download {package} from {url}: {reason}")]
    NetworkFailure {
        /// Description of the package being downloaded.
        package: String,
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
        /// Whether another attempt could plausibly succeed.
        retryable: bool,
    },

    /// The downloaded archive did not hash to the catalogued checksum.
    #[error("checksum mismatch for {package}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Description of the package whose archive was rejected.
        package: String,
        /// The checksum declared in the catalog.
        expected: String,
        /// The checksum of the downloaded bytes.
        actual: String,
    },

    /// Extracting an archive into its destination failed.
    #[error("failed to extract {package}: {reason}")]
    ExtractionFailed {
        /// Description of the package being installed.
        package: String,
        /// Description of the extraction failure.
        reason: String,
    },

    /// An execute bit could not be set. Reported as a warning only.
    #[error("could not mark {} executable: {reason}", .path.display())]
    PermissionDenied {
        /// The file whose permissions could not be changed.
        path: PathBuf,
        /// Description of the underlying I/O error.
        reason: String,
    },

    /// The host manifest could not be rewritten.
    #[error("manifest rewrite failed: {reason}")]
    ManifestRewriteFailed {
        /// Description of the rewrite failure.
        reason: String,
    },

    /// The run was cancelled by the caller.
    #[error("installation cancelled")]
    Cancelled,

    /// An offline install found a selected package missing from the bundle.
    #[error("bundled package {package} is missing from {}", .path.display())]
    MissingBundledPackage {
        /// Description of the missing package.
        package: String,
        /// Where the bundled package was expected.
        path: PathBuf,
    },

    /// The package catalog is malformed.
    #[error("invalid package catalog: {reason}")]
    InvalidCatalog {
        /// Description of the validation failure.
        reason: String,
    },

    /// The installer configuration is malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the validation failure.
        reason: String,
    },

    /// The install root could not be locked for this run.
    #[error("failed to lock install root {}: {source}", .path.display())]
    LockFailed {
        /// Path of the run guard file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl InstallerError {
    /// Returns the stable classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedPlatform { .. } => ErrorKind::UnsupportedPlatform,
            Self::NetworkFailure { .. } => ErrorKind::NetworkFailure,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::ExtractionFailed { .. } => ErrorKind::ExtractionFailed,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::ManifestRewriteFailed { .. } => ErrorKind::ManifestRewriteFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::MissingBundledPackage { .. } => ErrorKind::MissingBundledPackage,
            Self::InvalidCatalog { .. } => ErrorKind::InvalidCatalog,
            Self::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            Self::LockFailed { .. } => ErrorKind::LockFailed,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns the package this error is attributed to, when known.
    #[must_use]
    pub fn package(&self) -> Option<&str> {
        match self {
            Self::NetworkFailure { package, .. }
            | Self::ChecksumMismatch { package, .. }
            | Self::ExtractionFailed { package, .. }
            | Self::MissingBundledPackage { package, .. } => Some(package),
            _ => None,
        }
    }

    /// Whether retrying the same operation is likely to succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkFailure { retryable: true, .. })
    }

    /// Returns a remediation hint suitable for display next to the error.
    #[must_use]
    pub fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::UnsupportedPlatform { .. } => {
                Some("this platform is not supported by the prebuilt runtime packages")
            }
            Self::Cancelled => None,
            Self::PermissionDenied { .. } => {
                Some("grant execute permission to the file manually, then restart")
            }
            Self::InvalidConfig { .. } => Some("check the installer configuration file"),
            _ => Some(RECOVERY_HINT),
        }
    }
}

/// Stable error classification for telemetry and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`InstallerError::UnsupportedPlatform`].
    UnsupportedPlatform,
    /// See [`InstallerError::NetworkFailure`].
    NetworkFailure,
    /// See [`InstallerError::ChecksumMismatch`].
    ChecksumMismatch,
    /// See [`InstallerError::ExtractionFailed`].
    ExtractionFailed,
    /// See [`InstallerError::PermissionDenied`].
    PermissionDenied,
    /// See [`InstallerError::ManifestRewriteFailed`].
    ManifestRewriteFailed,
    /// See [`InstallerError::Cancelled`].
    Cancelled,
    /// See [`InstallerError::MissingBundledPackage`].
    MissingBundledPackage,
    /// See [`InstallerError::InvalidCatalog`].
    InvalidCatalog,
    /// See [`InstallerError::InvalidConfig`].
    InvalidConfig,
    /// See [`InstallerError::LockFailed`].
    LockFailed,
    /// See [`InstallerError::Io`].
    Io,
}

impl ErrorKind {
    /// Returns the identifier recorded in telemetry.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedPlatform => "UnsupportedPlatform",
            Self::NetworkFailure => "NetworkFailure",
            Self::ChecksumMismatch => "ChecksumMismatch",
            Self::ExtractionFailed => "ExtractionFailed",
            Self::PermissionDenied => "PermissionDenied",
            Self::ManifestRewriteFailed => "ManifestRewriteFailed",
            Self::Cancelled => "Cancelled",
            Self::MissingBundledPackage => "MissingBundledPackage",
            Self::InvalidCatalog => "InvalidCatalog",
            Self::InvalidConfig => "InvalidConfig",
            Self::LockFailed => "LockFailed",
            Self::Io => "Io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias using [`InstallerError`].
pub type Result<T> = std::result::Result<T, InstallerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn network_failure_names_package_and_url() {
        let err = InstallerError::NetworkFailure {
            package: "Language server (Linux x64)".to_owned(),
            url: "https://example.test/language-server.zip".to_owned(),
            reason: "connection reset".to_owned(),
            retryable: true,
        };
        let msg = err.to_string();
        assert!(msg.contains("Language server (Linux x64)"));
        assert!(msg.contains("https://example.test/language-server.zip"));
        assert!(err.is_retryable());
        assert_eq!(err.package(), Some("Language server (Linux x64)"));
    }

    #[test]
    fn checksum_mismatch_reports_both_digests() {
        let err = InstallerError::ChecksumMismatch {
            package: "debugger".to_owned(),
            expected: "abc".to_owned(),
            actual: "xyz".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("expected abc"));
        assert!(msg.contains("got xyz"));
        assert_eq!(err.kind().as_str(), "ChecksumMismatch");
        assert!(!err.is_retryable());
    }

    #[rstest]
    #[case::cancelled(InstallerError::Cancelled, "Cancelled")]
    #[case::unsupported(
        InstallerError::UnsupportedPlatform { reason: "arm".to_owned() },
        "UnsupportedPlatform"
    )]
    #[case::manifest(
        InstallerError::ManifestRewriteFailed { reason: "bad json".to_owned() },
        "ManifestRewriteFailed"
    )]
    #[case::io(InstallerError::Io(std::io::Error::other("disk")), "Io")]
    fn kind_identifiers_are_stable(#[case] err: InstallerError, #[case] expected: &str) {
        assert_eq!(err.kind().to_string(), expected);
    }

    #[test]
    fn terminal_failures_point_at_releases_page() {
        let err = InstallerError::ExtractionFailed {
            package: "formatter".to_owned(),
            reason: "corrupt archive".to_owned(),
        };
        assert_eq!(err.user_hint(), Some(RECOVERY_HINT));
        assert!(InstallerError::Cancelled.user_hint().is_none());
    }

    #[test]
    fn lock_failure_preserves_source() {
        let err = InstallerError::LockFailed {
            path: PathBuf::from("/tmp/install.lock.guard"),
            source: std::io::Error::other("busy"),
        };
        assert!(std::error::Error::source(&err).is_some());
    }
}
