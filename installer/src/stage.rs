//! Pipeline stages and the per-run installation record.

use crate::telemetry::TelemetryReporter;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A step of the installation pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Nothing has run yet.
    NotStarted,
    /// Detecting the host platform and selecting packages.
    ProbingPlatform,
    /// Verifying packages bundled with the distribution.
    OfflinePath,
    /// Downloading and installing packages.
    OnlinePath,
    /// Setting execute bits on package binaries.
    MakingExecutable,
    /// Rewriting the host manifest.
    RewritingManifest,
    /// Cleaning up staging and foreign packages.
    PostInstall,
    /// Every step succeeded.
    Completed,
}

impl Stage {
    /// Returns the identifier recorded in telemetry.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NotStarted",
            Self::ProbingPlatform => "ProbingPlatform",
            Self::OfflinePath => "OfflinePath",
            Self::OnlinePath => "OnlinePath",
            Self::MakingExecutable => "MakingExecutable",
            Self::RewritingManifest => "RewritingManifest",
            Self::PostInstall => "PostInstall",
            Self::Completed => "Completed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The observable state of the state machine.
///
/// `Failed` is terminal and records the stage that was running when the
/// failure occurred.
///
/// # Examples
///
/// ```
/// use runtime_installer::stage::{MachineState, Stage};
///
/// assert_eq!(MachineState::At(Stage::OnlinePath).to_string(), "OnlinePath");
/// assert_eq!(
///     MachineState::Failed(Stage::OnlinePath).to_string(),
///     "Failed(OnlinePath)"
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineState {
    /// Running, or finished successfully at [`Stage::Completed`].
    At(Stage),
    /// Halted by an error during the given stage.
    Failed(Stage),
}

impl MachineState {
    /// The stage the machine is at or failed in.
    #[must_use]
    pub fn stage(self) -> Stage {
        match self {
            Self::At(stage) | Self::Failed(stage) => stage,
        }
    }

    /// Whether no further transitions will happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::At(Stage::Completed) | Self::Failed(_))
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::At(Stage::NotStarted)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At(stage) => write!(f, "{stage}"),
            Self::Failed(stage) => write!(f, "Failed({stage})"),
        }
    }
}

/// Which acquisition path a run took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallType {
    /// Packages were bundled and only verified.
    Offline,
    /// Packages were downloaded and installed.
    Online,
}

impl InstallType {
    /// Returns the identifier recorded in telemetry.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
        }
    }
}

impl fmt::Display for InstallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run record owned by the state machine. Never persisted.
#[derive(Debug, Clone)]
pub struct InstallationInformation {
    /// The stage currently running, or the stage that failed.
    pub stage: Stage,
    /// Whether the run has failed.
    pub has_error: bool,
    /// The acquisition path, once chosen.
    pub install_type: Option<InstallType>,
    /// Telemetry accumulated over the run.
    pub telemetry: TelemetryReporter,
}

impl InstallationInformation {
    /// A fresh record for a run that has not started.
    #[must_use]
    pub fn new(telemetry: TelemetryReporter) -> Self {
        Self {
            stage: Stage::NotStarted,
            has_error: false,
            install_type: None,
            telemetry,
        }
    }

    /// The state derived from the current stage and error flag.
    #[must_use]
    pub fn state(&self) -> MachineState {
        if self.has_error {
            MachineState::Failed(self.stage)
        } else {
            MachineState::At(self.stage)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn information_reports_failure_at_current_stage() {
        let mut info = InstallationInformation::new(TelemetryReporter::new("test"));
        assert_eq!(info.state(), MachineState::At(Stage::NotStarted));

        info.stage = Stage::OnlinePath;
        info.has_error = true;
        assert_eq!(info.state(), MachineState::Failed(Stage::OnlinePath));
        assert!(info.state().is_terminal());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(MachineState::At(Stage::Completed).is_terminal());
        assert!(!MachineState::At(Stage::PostInstall).is_terminal());
        assert_eq!(MachineState::Failed(Stage::PostInstall).stage(), Stage::PostInstall);
    }
}
