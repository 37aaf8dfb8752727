//! Declarative package catalog.
//!
//! The catalog lists every runtime package the installer knows about,
//! together with the platforms it targets, where it is fetched from, the
//! checksum its archive must match, and where it is installed. Selection
//! filters the catalog for one [`PlatformInfo`]; packages are never mutated.
//!
//! Catalogs are JSON documents of the form:
//!
//! ```json
//! {
//!   "packages": [
//!     {
//!       "id": "language-server-linux-x64",
//!       "description": "Language server (Linux x64)",
//!       "url": "https://example.test/language-server-linux-x64.zip",
//!       "checksum": "<64 hex characters>",
//!       "destination_path": "language-server",
//!       "platforms": ["linux"],
//!       "architectures": ["x64"],
//!       "binaries": ["bin/server"]
//!     }
//!   ]
//! }
//! ```

use crate::artefact::extraction::ArchiveFormat;
use crate::artefact::sha256_digest::Sha256Digest;
use crate::error::{InstallerError, Result};
use crate::platform::{Architecture, OperatingSystem, PlatformInfo};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

/// One installable runtime package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Package {
    /// Stable identifier, unique within the catalog.
    pub id: String,
    /// Human-readable description used in messages.
    pub description: String,
    /// Where the archive is downloaded from.
    pub url: String,
    /// Expected SHA-256 digest of the archive.
    pub checksum: Sha256Digest,
    /// Install location relative to the install root.
    pub destination_path: Utf8PathBuf,
    /// Operating systems this package targets.
    pub platforms: BTreeSet<OperatingSystem>,
    /// Architectures this package targets; `None` means all.
    #[serde(default)]
    pub architectures: Option<BTreeSet<Architecture>>,
    /// Files, relative to the destination, that must be executable.
    #[serde(default)]
    pub binaries: Vec<Utf8PathBuf>,
    /// Explicit archive format, overriding detection from the URL.
    #[serde(default)]
    pub archive_format: Option<ArchiveFormat>,
}

impl Package {
    /// Whether this package should be installed on `platform`.
    #[must_use]
    pub fn supports(&self, platform: &PlatformInfo) -> bool {
        self.platforms.contains(&platform.operating_system)
            && self
                .architectures
                .as_ref()
                .is_none_or(|archs| archs.contains(&platform.architecture))
    }

    /// The archive format, explicit or inferred from the URL.
    #[must_use]
    pub fn archive_format(&self) -> Option<ArchiveFormat> {
        self.archive_format
            .or_else(|| ArchiveFormat::from_url(&self.url))
    }

    /// The absolute install location beneath `install_root`.
    #[must_use]
    pub fn destination_in(&self, install_root: &Path) -> PathBuf {
        install_root.join(self.destination_path.as_std_path())
    }

    /// Absolute paths of this package's executables beneath `install_root`.
    #[must_use]
    pub fn binaries_in(&self, install_root: &Path) -> Vec<PathBuf> {
        let destination = self.destination_in(install_root);
        self.binaries
            .iter()
            .map(|binary| destination.join(binary.as_std_path()))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    packages: Vec<Package>,
}

/// A validated, ordered list of packages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageCatalog {
    packages: Vec<Package>,
}

impl PackageCatalog {
    /// Build a catalog from packages, validating them.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::InvalidCatalog`] when ids are empty or
    /// duplicated, a package targets no platform, its archive format cannot
    /// be determined, a destination or binary path escapes its root, or two
    /// packages that can be selected together install into nested
    /// destinations.
    pub fn new(packages: Vec<Package>) -> Result<Self> {
        let mut seen = HashSet::new();
        for (index, package) in packages.iter().enumerate() {
            validate_package(package)?;
            if !seen.insert(package.id.as_str()) {
                return Err(invalid(format!("duplicate package id '{}'", package.id)));
            }
            let mut earlier = packages.iter().take(index);
            if let Some(other) = earlier.find(|other| conflicts(other, package)) {
                return Err(invalid(format!(
                    "destinations '{}' of package '{}' and '{}' of package '{}' overlap",
                    other.destination_path, other.id, package.destination_path, package.id
                )));
            }
        }
        Ok(Self { packages })
    }

    /// Parse and validate a catalog from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::InvalidCatalog`] for malformed JSON,
    /// malformed checksums, or any validation failure of [`Self::new`].
    pub fn from_json(json: &str) -> Result<Self> {
        let document: CatalogDocument =
            serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;
        Self::new(document.packages)
    }

    /// Load a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::InvalidCatalog`] when the file cannot be
    /// read or fails validation.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("failed to read {path}: {e}")))?;
        Self::from_json(&json)
    }

    /// All packages in declaration order.
    #[must_use]
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    /// The packages to install on `platform`, in declaration order.
    ///
    /// An empty selection is valid.
    #[must_use]
    pub fn select(&self, platform: &PlatformInfo) -> Vec<&Package> {
        self.packages
            .iter()
            .filter(|package| package.supports(platform))
            .collect()
    }

    /// Packages that are not installed on `platform`.
    #[must_use]
    pub fn foreign_packages(&self, platform: &PlatformInfo) -> Vec<&Package> {
        self.packages
            .iter()
            .filter(|package| !package.supports(platform))
            .collect()
    }

    /// Every architecture named explicitly by any package.
    ///
    /// Packages without an architecture list do not contribute.
    #[must_use]
    pub fn declared_architectures(&self) -> BTreeSet<Architecture> {
        self.packages
            .iter()
            .filter_map(|package| package.architectures.as_ref())
            .flatten()
            .copied()
            .collect()
    }

    /// Reject a platform whose OS is served only for other architectures.
    ///
    /// A catalog with no packages at all for the operating system is
    /// accepted: there is simply nothing to install.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::UnsupportedPlatform`] when the catalog has
    /// packages for `platform`'s operating system but none of them cover
    /// its architecture.
    pub fn ensure_supported(&self, platform: &PlatformInfo) -> Result<()> {
        let serves_os = self
            .packages
            .iter()
            .any(|package| package.platforms.contains(&platform.operating_system));
        if serves_os && self.select(platform).is_empty() {
            return Err(InstallerError::UnsupportedPlatform {
                reason: format!(
                    "no packages are available for {}-{}",
                    platform.operating_system, platform.architecture
                ),
            });
        }
        Ok(())
    }
}

fn validate_package(package: &Package) -> Result<()> {
    if package.id.trim().is_empty() {
        return Err(invalid("package id must not be empty".to_owned()));
    }
    if package.url.trim().is_empty() {
        return Err(invalid(format!("package '{}' has no url", package.id)));
    }
    if package.platforms.is_empty() {
        return Err(invalid(format!(
            "package '{}' targets no platforms",
            package.id
        )));
    }
    if package.archive_format().is_none() {
        return Err(invalid(format!(
            "cannot determine archive format of package '{}' from {}",
            package.id, package.url
        )));
    }
    if !is_contained(&package.destination_path)
        || normalized(&package.destination_path).as_str().is_empty()
    {
        return Err(invalid(format!(
            "destination '{}' of package '{}' must be a relative path inside the install root",
            package.destination_path, package.id
        )));
    }
    if let Some(binary) = package.binaries.iter().find(|b| !is_contained(b)) {
        return Err(invalid(format!(
            "binary '{binary}' of package '{}' escapes its destination",
            package.id
        )));
    }
    Ok(())
}

fn is_contained(path: &Utf8Path) -> bool {
    path.components()
        .all(|component| matches!(component, Utf8Component::Normal(_) | Utf8Component::CurDir))
}

/// `path` without `.` components.
fn normalized(path: &Utf8Path) -> Utf8PathBuf {
    path.components()
        .filter_map(|component| match component {
            Utf8Component::Normal(name) => Some(name),
            _ => None,
        })
        .collect()
}

/// Whether two packages could be selected on one host and install into
/// nested or identical destinations. Installing one would replace the other.
fn conflicts(first: &Package, second: &Package) -> bool {
    let shares_platform = !first.platforms.is_disjoint(&second.platforms);
    let shares_architecture = match (&first.architectures, &second.architectures) {
        (Some(left), Some(right)) => !left.is_disjoint(right),
        _ => true,
    };
    if !(shares_platform && shares_architecture) {
        return false;
    }
    let left = normalized(&first.destination_path);
    let right = normalized(&second.destination_path);
    left.starts_with(&right) || right.starts_with(&left)
}

fn invalid(reason: String) -> InstallerError {
    InstallerError::InvalidCatalog { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{PackageSpec, sha256_hex};
    use rstest::{fixture, rstest};

    #[fixture]
    fn catalog() -> PackageCatalog {
        PackageCatalog::new(vec![
            PackageSpec::new("server-linux-x64")
                .platforms(&[OperatingSystem::Linux])
                .architectures(&[Architecture::X64])
                .build(),
            PackageSpec::new("server-windows")
                .platforms(&[OperatingSystem::Windows])
                .build(),
            PackageSpec::new("debugger-any")
                .platforms(&[
                    OperatingSystem::Linux,
                    OperatingSystem::Windows,
                    OperatingSystem::MacOs,
                ])
                .build(),
            PackageSpec::new("server-macos-arm64")
                .platforms(&[OperatingSystem::MacOs])
                .architectures(&[Architecture::Arm64])
                .build(),
        ])
        .expect("valid catalog")
    }

    fn ids(packages: &[&Package]) -> Vec<String> {
        packages.iter().map(|p| p.id.clone()).collect()
    }

    #[rstest]
    #[case::linux_x64(OperatingSystem::Linux, Architecture::X64, &["server-linux-x64", "debugger-any"])]
    #[case::linux_x86(OperatingSystem::Linux, Architecture::X86, &["debugger-any"])]
    #[case::windows_x86(OperatingSystem::Windows, Architecture::X86, &["server-windows", "debugger-any"])]
    #[case::macos_arm64(OperatingSystem::MacOs, Architecture::Arm64, &["debugger-any", "server-macos-arm64"])]
    #[case::macos_x64(OperatingSystem::MacOs, Architecture::X64, &["debugger-any"])]
    fn selection_matrix(
        catalog: PackageCatalog,
        #[case] os: OperatingSystem,
        #[case] arch: Architecture,
        #[case] expected: &[&str],
    ) {
        let selected = catalog.select(&PlatformInfo::new(os, arch));
        assert_eq!(ids(&selected), expected);
    }

    #[rstest]
    fn selection_and_foreign_packages_partition_the_catalog(catalog: PackageCatalog) {
        let platform = PlatformInfo::new(OperatingSystem::Linux, Architecture::X64);
        let selected = catalog.select(&platform).len();
        let foreign = catalog.foreign_packages(&platform).len();
        assert_eq!(selected + foreign, catalog.packages().len());
    }

    #[rstest]
    fn declared_architectures_ignore_wildcards(catalog: PackageCatalog) {
        assert_eq!(
            catalog.declared_architectures(),
            BTreeSet::from([Architecture::X64, Architecture::Arm64])
        );
    }

    #[test]
    fn arm_host_with_only_x64_packages_is_unsupported() {
        let catalog = PackageCatalog::new(vec![
            PackageSpec::new("server-linux-x64")
                .platforms(&[OperatingSystem::Linux])
                .architectures(&[Architecture::X64])
                .build(),
        ])
        .expect("valid catalog");
        let err = catalog
            .ensure_supported(&PlatformInfo::new(OperatingSystem::Linux, Architecture::Arm64))
            .expect_err("expected unsupported platform");
        assert!(matches!(err, InstallerError::UnsupportedPlatform { .. }));
    }

    #[test]
    fn operating_system_without_packages_is_accepted() {
        let catalog = PackageCatalog::new(vec![
            PackageSpec::new("server-windows")
                .platforms(&[OperatingSystem::Windows])
                .build(),
        ])
        .expect("valid catalog");
        let platform = PlatformInfo::new(OperatingSystem::Linux, Architecture::X64);
        assert!(catalog.ensure_supported(&platform).is_ok());
        assert!(catalog.select(&platform).is_empty());
    }

    #[test]
    fn parses_json_and_normalises_checksum() {
        let checksum = sha256_hex(b"payload").to_ascii_uppercase();
        let json = format!(
            r#"{{"packages": [{{
                "id": "server",
                "description": "Language server",
                "url": "https://example.test/server.tar.gz",
                "checksum": "{checksum}",
                "destination_path": "server",
                "platforms": ["linux", "darwin"],
                "architectures": ["x86_64"],
                "binaries": ["bin/server"]
            }}]}}"#
        );
        let catalog = PackageCatalog::from_json(&json).expect("valid catalog");
        let package = catalog.packages().first().expect("one package");
        assert_eq!(package.checksum.as_str(), sha256_hex(b"payload"));
        assert_eq!(package.archive_format(), Some(ArchiveFormat::TarGz));
        assert!(package.platforms.contains(&OperatingSystem::MacOs));
    }

    #[rstest]
    #[case::bad_checksum(r#""checksum": "abc""#)]
    #[case::unknown_field(r#""mirror": "https://elsewhere.test""#)]
    fn rejects_malformed_entries(#[case] field: &str) {
        let json = format!(
            r#"{{"packages": [{{
                "id": "server",
                "description": "Language server",
                "url": "https://example.test/server.zip",
                "checksum": "{}",
                "destination_path": "server",
                "platforms": ["linux"],
                {field}
            }}]}}"#,
            sha256_hex(b"payload")
        );
        let err = PackageCatalog::from_json(&json).expect_err("expected invalid catalog");
        assert!(matches!(err, InstallerError::InvalidCatalog { .. }));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = PackageCatalog::new(vec![
            PackageSpec::new("server").build(),
            PackageSpec::new("server").build(),
        ])
        .expect_err("expected duplicate id");
        assert!(err.to_string().contains("duplicate package id 'server'"));
    }

    #[rstest]
    #[case::parent("../outside")]
    #[case::absolute("/opt/server")]
    #[case::empty("")]
    #[case::curdir(".")]
    #[case::curdir_slash("./")]
    fn rejects_escaping_destinations(#[case] destination: &str) {
        let err = PackageCatalog::new(vec![
            PackageSpec::new("server").destination(destination).build(),
        ])
        .expect_err("expected invalid destination");
        assert!(matches!(err, InstallerError::InvalidCatalog { .. }));
    }

    #[rstest]
    #[case::nested("tools", "tools/lldb")]
    #[case::nested_reversed("tools/lldb", "tools")]
    #[case::identical("tools", "./tools")]
    fn rejects_overlapping_destinations(#[case] first: &str, #[case] second: &str) {
        let err = PackageCatalog::new(vec![
            PackageSpec::new("outer").destination(first).build(),
            PackageSpec::new("inner").destination(second).build(),
        ])
        .expect_err("expected overlapping destinations");
        assert!(err.to_string().contains("overlap"), "unexpected error: {err}");
    }

    #[test]
    fn sibling_destinations_with_shared_prefix_are_accepted() {
        let catalog = PackageCatalog::new(vec![
            PackageSpec::new("tools").destination("tools").build(),
            PackageSpec::new("tools-extra").destination("tools-extra").build(),
        ]);
        assert!(catalog.is_ok());
    }

    #[rstest]
    #[case::other_platform(&[OperatingSystem::Windows], None)]
    #[case::other_architecture(&[OperatingSystem::Linux], Some(Architecture::Arm64))]
    fn overlap_is_allowed_when_never_selected_together(
        #[case] platforms: &[OperatingSystem],
        #[case] architecture: Option<Architecture>,
    ) {
        let mut second = PackageSpec::new("server-other")
            .destination("server")
            .platforms(platforms);
        if let Some(architecture) = architecture {
            second = second.architectures(&[architecture]);
        }
        let catalog = PackageCatalog::new(vec![
            PackageSpec::new("server-linux-x64")
                .destination("server")
                .architectures(&[Architecture::X64])
                .build(),
            second.build(),
        ]);
        assert!(catalog.is_ok(), "unexpected error: {catalog:?}");
    }

    #[test]
    fn rejects_binary_outside_destination() {
        let err = PackageCatalog::new(vec![
            PackageSpec::new("server").binaries(&["../../bin/sh"]).build(),
        ])
        .expect_err("expected invalid binary");
        assert!(err.to_string().contains("escapes its destination"));
    }

    #[test]
    fn rejects_unknown_archive_format() {
        let mut package = PackageSpec::new("server").build();
        package.url = "https://example.test/server.bin".to_owned();
        assert!(PackageCatalog::new(vec![package.clone()]).is_err());

        package.archive_format = Some(ArchiveFormat::TarZst);
        assert!(PackageCatalog::new(vec![package]).is_ok());
    }

    #[test]
    fn binaries_resolve_beneath_destination() {
        let package = PackageSpec::new("server")
            .destination("runtimes/server")
            .binaries(&["bin/server"])
            .build();
        let binaries = package.binaries_in(Path::new("/root-dir"));
        assert_eq!(
            binaries,
            vec![PathBuf::from("/root-dir/runtimes/server/bin/server")]
        );
    }
}
