//! Host platform detection.
//!
//! Determines the operating system, CPU architecture, and (on Linux) the
//! distribution of the machine the installer runs on. Detection reads host
//! facts through the [`HostFacts`] trait so the classification rules can be
//! exercised without depending on the machine running the tests.

use crate::error::{InstallerError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;

const OS_RELEASE_PATHS: &[&str] = &["/etc/os-release", "/usr/lib/os-release"];

const GLIBC_LOADERS: &[&str] = &[
    "/lib64/ld-linux-x86-64.so.2",
    "/lib/ld-linux-x86-64.so.2",
    "/lib/ld-linux.so.2",
    "/lib/ld-linux-aarch64.so.1",
    "/lib/ld-linux-armhf.so.3",
];

/// Operating systems the catalog can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingSystem {
    /// Microsoft Windows.
    Windows,
    /// Any Linux distribution.
    Linux,
    /// Apple macOS.
    #[serde(alias = "darwin", alias = "osx")]
    MacOs,
}

impl OperatingSystem {
    /// Returns the identifier used in catalogs and telemetry.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::MacOs => "macos",
        }
    }

    fn from_rust_os(value: &str) -> Option<Self> {
        match value {
            "windows" => Some(Self::Windows),
            "linux" => Some(Self::Linux),
            "macos" => Some(Self::MacOs),
            _ => None,
        }
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architectures the catalog can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// 32-bit x86.
    #[serde(alias = "ia32", alias = "i686")]
    X86,
    /// 64-bit x86.
    #[serde(alias = "x86_64", alias = "amd64")]
    X64,
    /// 32-bit ARM.
    Arm,
    /// 64-bit ARM.
    #[serde(alias = "aarch64")]
    Arm64,
    /// Anything else.
    Unknown,
}

impl Architecture {
    /// Returns the identifier used in catalogs and telemetry.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::X64 => "x64",
            Self::Arm => "arm",
            Self::Arm64 => "arm64",
            Self::Unknown => "unknown",
        }
    }

    fn from_rust_arch(value: &str) -> Self {
        match value {
            "x86" | "i386" | "i586" | "i686" => Self::X86,
            "x86_64" => Self::X64,
            "arm" => Self::Arm,
            "aarch64" => Self::Arm64,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Linux distribution as reported by `os-release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    /// The distribution identifier (`ID`), e.g. `ubuntu`.
    pub name: String,
    /// The distribution version (`VERSION_ID`), empty when unreported.
    pub version: String,
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} {}", self.name, self.version)
        }
    }
}

/// The detected host platform. Computed once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    /// The host operating system.
    pub operating_system: OperatingSystem,
    /// The host CPU architecture.
    pub architecture: Architecture,
    /// The Linux distribution, when running on Linux.
    pub distribution: Option<Distribution>,
}

impl PlatformInfo {
    /// Construct a platform without distribution details.
    #[must_use]
    pub fn new(operating_system: OperatingSystem, architecture: Architecture) -> Self {
        Self {
            operating_system,
            architecture,
            distribution: None,
        }
    }
}

impl fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.operating_system, self.architecture)?;
        if let Some(distribution) = &self.distribution {
            write!(f, " ({distribution})")?;
        }
        Ok(())
    }
}

/// Raw facts about the host, abstracted so detection can be tested.
#[cfg_attr(test, mockall::automock)]
pub trait HostFacts {
    /// The Rust-style OS name (`std::env::consts::OS`).
    fn os(&self) -> String;

    /// The Rust-style architecture name (`std::env::consts::ARCH`).
    fn arch(&self) -> String;

    /// The contents of the `os-release` file, if present.
    fn os_release(&self) -> Option<String>;

    /// Whether a musl dynamic loader is installed.
    fn has_musl_loader(&self) -> bool;

    /// Whether a glibc dynamic loader is installed.
    fn has_glibc_loader(&self) -> bool;
}

/// Host facts read from the running system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHostFacts;

impl HostFacts for SystemHostFacts {
    fn os(&self) -> String {
        std::env::consts::OS.to_owned()
    }

    fn arch(&self) -> String {
        std::env::consts::ARCH.to_owned()
    }

    fn os_release(&self) -> Option<String> {
        OS_RELEASE_PATHS
            .iter()
            .find_map(|path| std::fs::read_to_string(path).ok())
    }

    fn has_musl_loader(&self) -> bool {
        let Ok(entries) = std::fs::read_dir("/lib") else {
            return false;
        };
        entries.filter_map(std::result::Result::ok).any(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("ld-musl-")
        })
    }

    fn has_glibc_loader(&self) -> bool {
        GLIBC_LOADERS.iter().any(|path| Path::new(path).exists())
    }
}

/// Classifies the host into a [`PlatformInfo`].
pub struct PlatformProbe<'a> {
    facts: &'a dyn HostFacts,
    supported: BTreeSet<Architecture>,
}

impl<'a> PlatformProbe<'a> {
    /// Create a probe accepting the x86 family only.
    #[must_use]
    pub fn new(facts: &'a dyn HostFacts) -> Self {
        Self {
            facts,
            supported: BTreeSet::from([Architecture::X86, Architecture::X64]),
        }
    }

    /// Additionally accept the given architectures.
    ///
    /// Used to admit architectures that the catalog explicitly ships
    /// packages for. [`Architecture::Unknown`] is never accepted.
    #[must_use]
    pub fn with_architectures(mut self, extra: impl IntoIterator<Item = Architecture>) -> Self {
        self.supported.extend(
            extra
                .into_iter()
                .filter(|arch| *arch != Architecture::Unknown),
        );
        self
    }

    /// Detect the host platform.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::UnsupportedPlatform`] when the operating
    /// system or architecture is not supported, or when running on a musl
    /// based Linux without a glibc loader.
    pub fn detect(&self) -> Result<PlatformInfo> {
        let os_name = self.facts.os();
        let operating_system = OperatingSystem::from_rust_os(&os_name).ok_or_else(|| {
            InstallerError::UnsupportedPlatform {
                reason: format!("operating system {os_name} is not supported"),
            }
        })?;

        let architecture = Architecture::from_rust_arch(&self.facts.arch());
        if !self.supported.contains(&architecture) {
            return Err(InstallerError::UnsupportedPlatform {
                reason: format!(
                    "architecture {architecture} ({}) is not supported on {operating_system}",
                    self.facts.arch()
                ),
            });
        }

        let distribution = if operating_system == OperatingSystem::Linux {
            self.check_linux_runtime()?;
            self.facts
                .os_release()
                .and_then(|content| distribution_from_os_release(&content))
        } else {
            None
        };

        let info = PlatformInfo {
            operating_system,
            architecture,
            distribution,
        };
        debug!("detected platform {info}");
        Ok(info)
    }

    fn check_linux_runtime(&self) -> Result<()> {
        if self.facts.has_musl_loader() && !self.facts.has_glibc_loader() {
            return Err(InstallerError::UnsupportedPlatform {
                reason: "musl-based Linux distributions without glibc are not supported"
                    .to_owned(),
            });
        }
        Ok(())
    }
}

/// Extract the distribution name and version from `os-release` content.
#[must_use]
pub fn distribution_from_os_release(content: &str) -> Option<Distribution> {
    let vars = parse_os_release(content);
    let name = vars.get("ID").filter(|id| !id.is_empty())?;
    Some(Distribution {
        name: name.clone(),
        version: vars.get("VERSION_ID").cloned().unwrap_or_default(),
    })
}

fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_owned(), value.to_owned())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const UBUNTU: &str = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\nVERSION_ID=\"22.04\"\n";

    fn facts(os: &'static str, arch: &'static str) -> MockHostFacts {
        let mut facts = MockHostFacts::new();
        facts.expect_os().returning(move || os.to_owned());
        facts.expect_arch().returning(move || arch.to_owned());
        facts
            .expect_os_release()
            .returning(|| Some(UBUNTU.to_owned()));
        facts.expect_has_musl_loader().returning(|| false);
        facts.expect_has_glibc_loader().returning(|| true);
        facts
    }

    #[rstest]
    #[case::linux_x64("linux", "x86_64", OperatingSystem::Linux, Architecture::X64)]
    #[case::linux_x86("linux", "i686", OperatingSystem::Linux, Architecture::X86)]
    #[case::windows_x64("windows", "x86_64", OperatingSystem::Windows, Architecture::X64)]
    #[case::macos_x64("macos", "x86_64", OperatingSystem::MacOs, Architecture::X64)]
    fn detects_x86_family(
        #[case] os: &'static str,
        #[case] arch: &'static str,
        #[case] expected_os: OperatingSystem,
        #[case] expected_arch: Architecture,
    ) {
        let facts = facts(os, arch);
        let info = PlatformProbe::new(&facts).detect().expect("supported platform");
        assert_eq!(info.operating_system, expected_os);
        assert_eq!(info.architecture, expected_arch);
    }

    #[test]
    fn linux_reports_distribution() {
        let facts = facts("linux", "x86_64");
        let info = PlatformProbe::new(&facts).detect().expect("supported platform");
        assert_eq!(
            info.distribution,
            Some(Distribution {
                name: "ubuntu".to_owned(),
                version: "22.04".to_owned(),
            })
        );
        assert_eq!(info.to_string(), "linux-x64 (ubuntu 22.04)");
    }

    #[test]
    fn windows_has_no_distribution() {
        let facts = facts("windows", "x86_64");
        let info = PlatformProbe::new(&facts).detect().expect("supported platform");
        assert!(info.distribution.is_none());
    }

    #[rstest]
    #[case::arm("arm")]
    #[case::arm64("aarch64")]
    #[case::riscv("riscv64")]
    fn rejects_non_x86_by_default(#[case] arch: &'static str) {
        let facts = facts("linux", arch);
        let err = PlatformProbe::new(&facts)
            .detect()
            .expect_err("expected unsupported platform");
        assert!(matches!(err, InstallerError::UnsupportedPlatform { .. }));
    }

    #[test]
    fn accepts_arm64_when_catalog_declares_it() {
        let facts = facts("macos", "aarch64");
        let info = PlatformProbe::new(&facts)
            .with_architectures([Architecture::Arm64])
            .detect()
            .expect("arm64 admitted");
        assert_eq!(info.architecture, Architecture::Arm64);
    }

    #[test]
    fn never_admits_unknown_architecture() {
        let facts = facts("linux", "mips");
        let result = PlatformProbe::new(&facts)
            .with_architectures([Architecture::Unknown])
            .detect();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unknown_operating_system() {
        let facts = facts("freebsd", "x86_64");
        let err = PlatformProbe::new(&facts)
            .detect()
            .expect_err("expected unsupported platform");
        assert!(err.to_string().contains("freebsd"));
    }

    #[test]
    fn rejects_musl_without_glibc() {
        let mut facts = MockHostFacts::new();
        facts.expect_os().returning(|| "linux".to_owned());
        facts.expect_arch().returning(|| "x86_64".to_owned());
        facts.expect_has_musl_loader().returning(|| true);
        facts.expect_has_glibc_loader().returning(|| false);
        facts.expect_os_release().never();

        let err = PlatformProbe::new(&facts)
            .detect()
            .expect_err("expected musl rejection");
        assert!(err.to_string().contains("musl"));
    }

    #[test]
    fn accepts_musl_with_glibc_compat() {
        let mut facts = MockHostFacts::new();
        facts.expect_os().returning(|| "linux".to_owned());
        facts.expect_arch().returning(|| "x86_64".to_owned());
        facts.expect_os_release().returning(|| None);
        facts.expect_has_musl_loader().returning(|| true);
        facts.expect_has_glibc_loader().returning(|| true);

        let info = PlatformProbe::new(&facts).detect().expect("glibc compat present");
        assert!(info.distribution.is_none());
    }

    #[test]
    fn parses_quoted_os_release_values() {
        let content = "# comment\nID='alpine'\nVERSION_ID=3.19.1\n";
        let distribution = distribution_from_os_release(content).expect("distribution");
        assert_eq!(distribution.name, "alpine");
        assert_eq!(distribution.version, "3.19.1");
    }

    #[test]
    fn os_release_without_id_has_no_distribution() {
        assert!(distribution_from_os_release("NAME=Mystery\n").is_none());
    }

    #[test]
    fn catalog_identifiers_deserialize_with_aliases() {
        let arch: Architecture = serde_json::from_str("\"x86_64\"").expect("alias");
        assert_eq!(arch, Architecture::X64);
        let os: OperatingSystem = serde_json::from_str("\"darwin\"").expect("alias");
        assert_eq!(os, OperatingSystem::MacOs);
    }
}
