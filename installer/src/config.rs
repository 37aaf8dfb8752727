//! Installer configuration.
//!
//! Configuration is read from a TOML file, either named on the command line
//! or found as `config.toml` in the platform configuration directory. Every
//! field has a default, so an absent file is equivalent to an empty one.
//! Command-line flags override file values after loading.
//!
//! ```toml
//! install_root = "/opt/runtimes"
//! catalog = "/opt/runtimes/packages.json"
//! manifest = "/opt/host/package.json"
//! mode = "online"
//! jobs = 4
//! attempt_timeout_secs = 60
//! activation_events = ["onLanguage:rust"]
//! prune_foreign_packages = true
//!
//! [retry]
//! attempts = 3
//! base_delay_secs = 2
//!
//! [experiments]
//! feature_engine = true
//!
//! [settings]
//! feature_engine = "runtime.featureEngine"
//! colorization = "runtime.colorization"
//! ```

use crate::dirs::BaseDirs;
use crate::download::RetryPolicy;
use crate::error::InstallerError;
use crate::manifest::{ManifestRewrite, SettingDefault};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file in the configuration directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default catalog file name inside the install root.
pub const DEFAULT_CATALOG_FILE_NAME: &str = "packages.json";

/// How packages are acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// Download packages from their catalog URLs.
    #[default]
    Online,
    /// Verify packages bundled with the distribution.
    Offline,
}

/// Retry settings for downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts per package.
    pub attempts: u32,
    /// Delay before the second attempt, doubling afterwards.
    pub base_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_secs: 2,
        }
    }
}

/// Experiment flags; `None` means not supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Experiments {
    /// Whether the feature engine experiment is enabled.
    pub feature_engine: Option<bool>,
    /// Whether the colorization experiment is enabled.
    pub colorization: Option<bool>,
}

/// Manifest property keys driven by the experiment flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingKeys {
    /// Property controlled by [`Experiments::feature_engine`].
    pub feature_engine: String,
    /// Property controlled by [`Experiments::colorization`].
    pub colorization: String,
}

impl Default for SettingKeys {
    fn default() -> Self {
        Self {
            feature_engine: "runtime.featureEngine".to_owned(),
            colorization: "runtime.colorization".to_owned(),
        }
    }
}

/// The complete installer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallerConfig {
    /// Where packages, the marker, and the log live.
    pub install_root: Option<Utf8PathBuf>,
    /// The package catalog; defaults to `packages.json` in the install root.
    pub catalog: Option<Utf8PathBuf>,
    /// The host manifest to rewrite, if any.
    pub manifest: Option<Utf8PathBuf>,
    /// Acquisition mode.
    pub mode: InstallMode,
    /// Maximum concurrent package downloads.
    pub jobs: usize,
    /// Download retry settings.
    pub retry: RetryConfig,
    /// Timeout for a single HTTP attempt.
    pub attempt_timeout_secs: u64,
    /// Activation triggers written into the manifest.
    pub activation_events: Vec<String>,
    /// Experiment flags.
    pub experiments: Experiments,
    /// Manifest keys for the experiment flags.
    pub settings: SettingKeys,
    /// Remove packages built for other platforms after installing.
    pub prune_foreign_packages: bool,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            install_root: None,
            catalog: None,
            manifest: None,
            mode: InstallMode::Online,
            jobs: 4,
            retry: RetryConfig::default(),
            attempt_timeout_secs: 60,
            activation_events: vec!["onStartupFinished".to_owned()],
            experiments: Experiments::default(),
            settings: SettingKeys::default(),
            prune_foreign_packages: false,
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// The configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration TOML.
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        /// The configuration file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("{reason}")]
    Invalid {
        /// Description of the problem.
        reason: String,
    },

    /// A required directory could not be determined.
    #[error("could not determine the {what} directory")]
    MissingDirectory {
        /// Which directory was needed.
        what: &'static str,
    },
}

impl From<ConfigError> for InstallerError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidConfig {
            reason: err.to_string(),
        }
    }
}

impl InstallerConfig {
    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or any
    /// error of [`Self::from_toml`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(path, &text)
    }

    /// Load `explicit` if given, else `config.toml` from the configuration
    /// directory if it exists, else the defaults.
    ///
    /// # Errors
    ///
    /// Returns any error of [`Self::load`].
    pub fn discover(dirs: &dyn BaseDirs, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match dirs.config_dir().map(|dir| dir.join(CONFIG_FILE_NAME)) {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `jobs` or `retry.attempts` is
    /// zero, or the activation trigger list is empty or contains `*`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid {
                reason: reason.to_owned(),
            })
        };
        if self.jobs == 0 {
            return invalid("jobs must be at least 1");
        }
        if self.retry.attempts == 0 {
            return invalid("retry.attempts must be at least 1");
        }
        if self.activation_events.is_empty() {
            return invalid("activation_events must not be empty");
        }
        if self.activation_events.iter().any(|event| event == "*") {
            return invalid("activation_events must not contain '*'");
        }
        Ok(())
    }

    /// The install root, falling back to the platform data directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingDirectory`] when no root is configured
    /// and the data directory is unknown or not UTF-8.
    pub fn resolve_install_root(&self, dirs: &dyn BaseDirs) -> Result<Utf8PathBuf, ConfigError> {
        if let Some(root) = &self.install_root {
            return Ok(root.clone());
        }
        dirs.data_dir()
            .and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok())
            .ok_or(ConfigError::MissingDirectory { what: "data" })
    }

    /// The catalog path for `install_root`.
    #[must_use]
    pub fn resolve_catalog(&self, install_root: &Utf8Path) -> Utf8PathBuf {
        self.catalog
            .clone()
            .unwrap_or_else(|| install_root.join(DEFAULT_CATALOG_FILE_NAME))
    }

    /// The download retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.attempts,
            base_delay: Duration::from_secs(self.retry.base_delay_secs),
        }
    }

    /// Timeout for one HTTP attempt.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// The manifest changes implied by this configuration.
    ///
    /// Setting defaults are included only for supplied experiment flags.
    #[must_use]
    pub fn manifest_rewrite(&self) -> ManifestRewrite {
        let flags = [
            (self.experiments.feature_engine, &self.settings.feature_engine),
            (self.experiments.colorization, &self.settings.colorization),
        ];
        ManifestRewrite {
            activation_events: self.activation_events.clone(),
            settings: flags
                .into_iter()
                .filter_map(|(flag, key)| {
                    flag.map(|enabled| SettingDefault {
                        key: key.clone(),
                        value: serde_json::Value::Bool(enabled),
                    })
                })
                .collect(),
        }
    }
}
