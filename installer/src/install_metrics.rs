//! Local metrics for installer runs.
//!
//! Aggregate counts of online and offline installs, failed runs, and the
//! cumulative time spent installing. Metrics never leave the machine; they
//! are stored in the installer's data directory at
//! `<data_dir>/metrics/install_metrics.json`.

use crate::dirs::BaseDirs;
use crate::stage::InstallType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const METRICS_DIRNAME: &str = "metrics";
const METRICS_FILENAME: &str = "install_metrics.json";

/// What a finished run contributes to the metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMetric {
    /// The run installed or verified packages along the given path.
    Installed(InstallType),
    /// The run failed.
    Failed,
}

/// Aggregate installer metrics stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct InstallMetrics {
    total_installs: u64,
    online_installs: u64,
    offline_installs: u64,
    failed_runs: u64,
    total_install_millis: u64,
}

impl InstallMetrics {
    /// Returns the number of successful installs.
    #[must_use]
    pub fn total_installs(&self) -> u64 {
        self.total_installs
    }

    /// Returns the number of successful downloaded installs.
    #[must_use]
    pub fn online_installs(&self) -> u64 {
        self.online_installs
    }

    /// Returns the number of successful bundled installs.
    #[must_use]
    pub fn offline_installs(&self) -> u64 {
        self.offline_installs
    }

    /// Returns the number of failed runs.
    #[must_use]
    pub fn failed_runs(&self) -> u64 {
        self.failed_runs
    }

    /// Returns total cumulative install duration of successful runs.
    #[must_use]
    pub fn total_install_duration(&self) -> Duration {
        Duration::from_millis(self.total_install_millis)
    }

    /// Records one finished run.
    pub fn record(&mut self, metric: RunMetric, duration: Duration) {
        match metric {
            RunMetric::Installed(install_type) => {
                self.total_installs = self.total_installs.saturating_add(1);
                let counter = match install_type {
                    InstallType::Online => &mut self.online_installs,
                    InstallType::Offline => &mut self.offline_installs,
                };
                *counter = counter.saturating_add(1);
                self.total_install_millis = self
                    .total_install_millis
                    .saturating_add(duration_to_millis(duration));
            }
            RunMetric::Failed => self.failed_runs = self.failed_runs.saturating_add(1),
        }
    }

    /// Returns a human-readable installer metrics summary line.
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            concat!(
                "Install metrics: online {}/{} ({}%), offline {}/{} ({}%), ",
                "failed runs {}, total installation time {}"
            ),
            self.online_installs,
            self.total_installs,
            percentage(self.online_installs, self.total_installs),
            self.offline_installs,
            self.total_installs,
            percentage(self.offline_installs, self.total_installs),
            self.failed_runs,
            format_duration(self.total_install_duration()),
        )
    }
}

/// Outcome details returned after recording metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    metrics: InstallMetrics,
    recovered_from_corrupt_file: bool,
}

impl RecordOutcome {
    /// Returns the updated aggregate metrics.
    #[must_use]
    pub fn metrics(&self) -> &InstallMetrics {
        &self.metrics
    }

    /// Returns true when a malformed metrics file was reset to defaults.
    #[must_use]
    pub fn recovered_from_corrupt_file(&self) -> bool {
        self.recovered_from_corrupt_file
    }
}

/// Errors that prevent metrics persistence.
#[derive(Debug, thiserror::Error)]
pub enum InstallMetricsError {
    /// The installer data directory could not be resolved.
    #[error("could not determine the installer data directory")]
    MissingDataDirectory,

    /// Creating the metrics directory failed.
    #[error("failed to create metrics directory {}: {source}", path.display())]
    CreateDirectory {
        /// Directory path that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading the metrics file failed.
    #[error("failed to read metrics file {}: {source}", path.display())]
    ReadMetrics {
        /// File path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Serializing metrics failed.
    #[error("failed to serialize metrics: {source}")]
    SerializeMetrics {
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// Writing the metrics file failed.
    #[error("failed to write metrics file {}: {source}", path.display())]
    WriteMetrics {
        /// File path that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Records one finished run in the installer's metrics store.
///
/// # Errors
///
/// Returns [`InstallMetricsError`] when the data directory is unknown or
/// the metrics file cannot be read or written.
pub fn record_run(
    dirs: &dyn BaseDirs,
    metric: RunMetric,
    duration: Duration,
) -> Result<RecordOutcome, InstallMetricsError> {
    let metrics_path = metrics_path(dirs)?;
    record_run_at_path(&metrics_path, metric, duration)
}

/// Records one finished run at an explicit metrics file path.
///
/// A malformed metrics file is replaced by fresh metrics and reported
/// through [`RecordOutcome::recovered_from_corrupt_file`].
///
/// # Errors
///
/// Returns [`InstallMetricsError`] when the metrics file cannot be read or
/// written.
pub fn record_run_at_path(
    metrics_path: &Path,
    metric: RunMetric,
    duration: Duration,
) -> Result<RecordOutcome, InstallMetricsError> {
    let (mut metrics, recovered_from_corrupt_file) = load_metrics(metrics_path)?;
    metrics.record(metric, duration);
    persist_metrics(metrics_path, &metrics)?;

    Ok(RecordOutcome {
        metrics,
        recovered_from_corrupt_file,
    })
}

fn metrics_path(dirs: &dyn BaseDirs) -> Result<PathBuf, InstallMetricsError> {
    let data_dir = dirs
        .data_dir()
        .ok_or(InstallMetricsError::MissingDataDirectory)?;
    Ok(data_dir.join(METRICS_DIRNAME).join(METRICS_FILENAME))
}

fn load_metrics(metrics_path: &Path) -> Result<(InstallMetrics, bool), InstallMetricsError> {
    if !metrics_path.exists() {
        return Ok((InstallMetrics::default(), false));
    }

    let content = std::fs::read_to_string(metrics_path).map_err(|source| {
        InstallMetricsError::ReadMetrics {
            path: metrics_path.to_path_buf(),
            source,
        }
    })?;

    match serde_json::from_str::<InstallMetrics>(&content) {
        Ok(metrics) => Ok((metrics, false)),
        Err(_) => Ok((InstallMetrics::default(), true)),
    }
}

fn persist_metrics(
    metrics_path: &Path,
    metrics: &InstallMetrics,
) -> Result<(), InstallMetricsError> {
    let parent = metrics_path
        .parent()
        .ok_or_else(|| InstallMetricsError::CreateDirectory {
            path: PathBuf::new(),
            source: std::io::Error::other("metrics file path has no parent"),
        })?;

    std::fs::create_dir_all(parent).map_err(|source| InstallMetricsError::CreateDirectory {
        path: parent.to_path_buf(),
        source,
    })?;

    let json = serde_json::to_string_pretty(metrics)
        .map_err(|source| InstallMetricsError::SerializeMetrics { source })?;
    std::fs::write(metrics_path, json).map_err(|source| InstallMetricsError::WriteMetrics {
        path: metrics_path.to_path_buf(),
        source,
    })?;

    Ok(())
}

/// `part / whole` as a percentage with one decimal, truncated.
fn percentage(part: u64, whole: u64) -> String {
    if whole == 0 {
        return "0.0".to_owned();
    }
    let tenths = u128::from(part) * 1000 / u128::from(whole);
    format!("{}.{}", tenths / 10, tenths % 10)
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let millis = duration.subsec_millis();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        return format!("{hours}h {minutes}m {seconds}.{millis:03}s");
    }
    if minutes > 0 {
        return format!("{minutes}m {seconds}.{millis:03}s");
    }
    format!("{seconds}.{millis:03}s")
}
