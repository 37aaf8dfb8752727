//! Progress and notification surface of the installation pipeline.
//!
//! The pipeline reports to an [`InstallObserver`]: stage transitions,
//! download progress, non-fatal warnings, and the terminal failure. Every
//! method has an empty default so observers implement only what they need.
//! Observers are called from worker threads and must be `Sync`.

use crate::error::{ErrorKind, InstallerError};
use crate::sanitize::sanitize;
use crate::stage::{MachineState, Stage};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Byte-level download progress for one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// The package being downloaded.
    pub package_id: String,
    /// Bytes received so far in the current attempt.
    pub bytes_downloaded: u64,
    /// Advertised archive size, when known.
    pub total_bytes: Option<u64>,
}

impl Progress {
    /// Completion percentage, when the total size is known and non-zero.
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        let total = self.total_bytes.filter(|total| *total > 0)?;
        let percent = self.bytes_downloaded.min(total).saturating_mul(100) / total;
        u8::try_from(percent).ok()
    }
}

/// A non-fatal problem raised during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallWarning {
    /// Classification of the underlying error.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl From<&InstallerError> for InstallWarning {
    fn from(err: &InstallerError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Attribution of a terminal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    /// The stage that was running.
    pub stage: Stage,
    /// Classification of the error.
    pub kind: ErrorKind,
    /// The package the failure is attributed to, if any.
    pub package: Option<String>,
    /// The sanitized error message.
    pub message: String,
    /// What the user can do about it.
    pub hint: Option<&'static str>,
}

impl FailureReport {
    /// Build a report for `err` raised during `stage`.
    #[must_use]
    pub fn new(stage: Stage, err: &InstallerError) -> Self {
        Self {
            stage,
            kind: err.kind(),
            package: err.package().map(str::to_owned),
            message: sanitize(&err.to_string()),
            hint: err.user_hint(),
        }
    }
}

/// Receiver of pipeline notifications.
pub trait InstallObserver: Send + Sync {
    /// The state machine moved from `from` to `to`.
    fn on_stage_changed(&self, _from: MachineState, _to: MachineState) {}

    /// A download made progress.
    fn on_progress(&self, _progress: &Progress) {}

    /// A non-fatal problem occurred.
    fn on_warning(&self, _warning: &InstallWarning) {}

    /// The run failed.
    fn on_error(&self, _report: &FailureReport) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl InstallObserver for NullObserver {}

/// Forwards every notification to several observers in order.
#[derive(Default)]
pub struct CompositeObserver<'a> {
    observers: Vec<&'a dyn InstallObserver>,
}

impl<'a> CompositeObserver<'a> {
    /// Create an empty composite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer.
    #[must_use]
    pub fn with(mut self, observer: &'a dyn InstallObserver) -> Self {
        self.observers.push(observer);
        self
    }
}

impl InstallObserver for CompositeObserver<'_> {
    fn on_stage_changed(&self, from: MachineState, to: MachineState) {
        for observer in &self.observers {
            observer.on_stage_changed(from, to);
        }
    }

    fn on_progress(&self, progress: &Progress) {
        for observer in &self.observers {
            observer.on_progress(progress);
        }
    }

    fn on_warning(&self, warning: &InstallWarning) {
        for observer in &self.observers {
            observer.on_warning(warning);
        }
    }

    fn on_error(&self, report: &FailureReport) {
        for observer in &self.observers {
            observer.on_error(report);
        }
    }
}

/// Appends a persistent, user-facing record of the run to a log file.
///
/// Write failures are ignored; the log is best effort.
pub struct LogFileObserver {
    path: PathBuf,
    file: Mutex<File>,
}

impl LogFileObserver {
    /// Name of the log file inside the install root.
    pub const FILE_NAME: &'static str = "install.log";

    /// Open (creating or appending to) the log file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Where the log is written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, line: &str) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = writeln!(file, "{line}") {
            debug!("could not append to {}: {err}", self.path.display());
        }
    }
}

impl InstallObserver for LogFileObserver {
    fn on_stage_changed(&self, from: MachineState, to: MachineState) {
        self.write_line(&format!("[stage] {from} -> {to}"));
    }

    fn on_warning(&self, warning: &InstallWarning) {
        self.write_line(&format!("[warning] {}: {}", warning.kind, warning.message));
    }

    fn on_error(&self, report: &FailureReport) {
        let package = report.package.as_deref().unwrap_or("-");
        self.write_line(&format!(
            "[error] {} during {} (package: {package}): {}",
            report.kind, report.stage, report.message
        ));
        if let Some(hint) = report.hint {
            self.write_line(&format!("[error] To recover, {hint}."));
        }
    }
}
