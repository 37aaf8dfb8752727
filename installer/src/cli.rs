//! CLI argument definitions for the runtime installer.
//!
//! This module defines the command-line interface using clap. It is separated
//! from the main entrypoint to keep the binary small and focused on
//! orchestration.

use crate::config::{InstallMode, InstallerConfig};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

/// Install the runtime dependencies of a host tool.
#[derive(Parser, Debug)]
#[command(name = "runtime-installer")]
#[command(version, about)]
#[command(long_about = concat!(
    "Install the runtime dependencies of a host tool.\n\n",
    "The installer detects the host platform, selects the matching packages from ",
    "the package catalog, downloads and verifies them (or checks the bundled copies ",
    "in offline mode), places them atomically under the install root, and rewrites ",
    "the host manifest. A completed install is recorded by a marker file so later ",
    "runs do nothing.",
))]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Install using the configured catalog:\n",
    "    $ runtime-installer\n\n",
    "  Verify a bundled offline distribution:\n",
    "    $ runtime-installer --mode offline --install-root ./runtimes\n\n",
    "  Show what would be installed:\n",
    "    $ runtime-installer --dry-run\n\n",
    "  Report the installation state:\n",
    "    $ runtime-installer status",
))]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Install arguments (used when no subcommand is given).
    #[command(flatten)]
    pub install: InstallArgs,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Install runtime dependencies (default when no subcommand given).
    Install(InstallArgs),

    /// Report the detected platform and whether dependencies are installed.
    Status(StatusArgs),
}

/// Where configuration, packages and the catalog live.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationArgs {
    /// Configuration file [default: platform config directory].
    #[arg(long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Directory runtime packages are installed into [default: platform data directory].
    #[arg(short = 'r', long, value_name = "DIR")]
    pub install_root: Option<Utf8PathBuf>,

    /// Package catalog [default: packages.json in the install root].
    #[arg(short, long, value_name = "FILE")]
    pub catalog: Option<Utf8PathBuf>,
}

impl LocationArgs {
    /// Override configuration values with the given locations.
    pub fn apply(&self, config: &mut InstallerConfig) {
        if let Some(install_root) = &self.install_root {
            config.install_root = Some(install_root.clone());
        }
        if let Some(catalog) = &self.catalog {
            config.catalog = Some(catalog.clone());
        }
    }
}

/// Arguments for the install command.
#[derive(Parser, Debug, Clone, Default)]
pub struct InstallArgs {
    /// Configuration and catalog locations.
    #[command(flatten)]
    pub locations: LocationArgs,

    /// Host manifest to rewrite after installation.
    #[arg(short, long, value_name = "FILE")]
    pub manifest: Option<Utf8PathBuf>,

    /// Download packages or verify bundled ones.
    #[arg(long, value_enum, value_name = "MODE")]
    pub mode: Option<InstallMode>,

    /// Maximum number of concurrent downloads.
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Remove bundled packages meant for other platforms.
    #[arg(long)]
    pub prune_foreign_packages: bool,

    /// Show the packages that would be installed and exit.
    #[arg(long)]
    pub dry_run: bool,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Suppress progress output (errors still shown).
    #[arg(short, long, conflicts_with = "verbosity")]
    pub quiet: bool,
}

impl InstallArgs {
    /// Override configuration values with the flags that were given.
    ///
    /// # Examples
    ///
    /// ```
    /// use runtime_installer::cli::InstallArgs;
    /// use runtime_installer::config::{InstallMode, InstallerConfig};
    ///
    /// let args = InstallArgs {
    ///     mode: Some(InstallMode::Offline),
    ///     jobs: Some(2),
    ///     ..InstallArgs::default()
    /// };
    /// let mut config = InstallerConfig::default();
    /// args.apply(&mut config);
    ///
    /// assert_eq!(config.mode, InstallMode::Offline);
    /// assert_eq!(config.jobs, 2);
    /// ```
    pub fn apply(&self, config: &mut InstallerConfig) {
        self.locations.apply(config);
        if let Some(manifest) = &self.manifest {
            config.manifest = Some(manifest.clone());
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if self.prune_foreign_packages {
            config.prune_foreign_packages = true;
        }
    }

    /// The log level implied by `-v` and `-q`.
    #[must_use]
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Warn;
        }
        match self.verbosity {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

/// Arguments for the status command.
#[derive(Parser, Debug, Clone, Default)]
pub struct StatusArgs {
    /// Configuration and catalog locations.
    #[command(flatten)]
    pub locations: LocationArgs,
}

impl Cli {
    /// Returns the effective install arguments.
    ///
    /// If an `Install` subcommand was provided, returns those arguments.
    /// Otherwise returns the flattened install arguments.
    ///
    /// # Note
    ///
    /// When `Command::Status` is active, this returns the default flattened
    /// install arguments. Callers should check `self.command` before calling
    /// this method if the `Status` case needs different handling.
    #[must_use]
    pub fn install_args(&self) -> &InstallArgs {
        match &self.command {
            Some(Command::Install(args)) => args,
            Some(Command::Status(_)) | None => &self.install,
        }
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
