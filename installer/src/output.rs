//! Output formatting for the installer CLI.
//!
//! Message builders for the end of a run, the dry-run and status reports,
//! and [`ConsoleObserver`], which turns pipeline notifications into
//! progress lines on the terminal.

use crate::catalog::Package;
use crate::config::InstallMode;
use crate::error::InstallerError;
use crate::observer::{FailureReport, InstallObserver, InstallWarning, Progress};
use crate::pipeline::{RunOutcome, RunReport};
use crate::stage::{InstallType, MachineState};
use camino::Utf8Path;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Notice printed when the host manifest was rewritten.
pub const RELOAD_NOTICE: &str =
    "The host manifest was updated; reload the host to finish the installation.";

/// Write one line, ignoring failures.
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort output; ignore write failures.
    }
}

/// Format a success message after a run.
///
/// # Example
///
/// ```
/// use camino::Utf8Path;
/// use runtime_installer::output::success_message;
/// use runtime_installer::pipeline::{RunOutcome, RunReport};
/// use runtime_installer::stage::InstallType;
///
/// let report = RunReport {
///     outcome: RunOutcome::Installed,
///     install_type: Some(InstallType::Online),
///     packages_installed: vec!["server".to_owned()],
///     warnings: Vec::new(),
///     reload_required: false,
/// };
/// let message = success_message(&report, Utf8Path::new("/opt/runtimes"));
/// assert_eq!(message, "Installed 1 runtime package to /opt/runtimes");
/// ```
#[must_use]
pub fn success_message(report: &RunReport, install_root: &Utf8Path) -> String {
    if report.outcome == RunOutcome::AlreadyInstalled {
        return format!("Runtime dependencies are already installed in {install_root}");
    }
    let count = report.packages_installed.len();
    let noun = if count == 1 { "package" } else { "packages" };
    match report.install_type {
        Some(InstallType::Offline) => {
            format!("Verified {count} bundled runtime {noun} in {install_root}")
        }
        Some(InstallType::Online) | None => {
            format!("Installed {count} runtime {noun} to {install_root}")
        }
    }
}

/// Format a terminal error together with its recovery hint.
#[must_use]
pub fn failure_message(err: &InstallerError) -> String {
    match err.user_hint() {
        Some(hint) => format!("error: {err}\nTo recover, {hint}."),
        None => format!("error: {err}"),
    }
}

/// Configuration information for dry-run output.
#[derive(Debug)]
pub struct DryRunInfo<'a> {
    /// Directory packages would be installed into.
    pub install_root: &'a Utf8Path,
    /// The catalog that was read.
    pub catalog: &'a Utf8Path,
    /// Host manifest that would be rewritten.
    pub manifest: Option<&'a Utf8Path>,
    /// Acquisition mode.
    pub mode: InstallMode,
    /// Maximum concurrent downloads.
    pub jobs: usize,
    /// Detected platform.
    pub platform: &'a str,
    /// Packages selected for the platform.
    pub packages: &'a [&'a Package],
}

impl DryRunInfo<'_> {
    /// Format the dry-run information for display.
    ///
    /// # Example
    ///
    /// ```
    /// use camino::Utf8Path;
    /// use runtime_installer::config::InstallMode;
    /// use runtime_installer::output::DryRunInfo;
    ///
    /// let info = DryRunInfo {
    ///     install_root: Utf8Path::new("/opt/runtimes"),
    ///     catalog: Utf8Path::new("/opt/runtimes/packages.json"),
    ///     manifest: None,
    ///     mode: InstallMode::Online,
    ///     jobs: 4,
    ///     platform: "linux-x64",
    ///     packages: &[],
    /// };
    ///
    /// let output = info.display_text();
    /// assert!(output.contains("Dry run"));
    /// assert!(output.contains("(none)"));
    /// ```
    #[must_use]
    pub fn display_text(&self) -> String {
        let mut lines = vec![
            "Dry run - no files will be modified".to_owned(),
            String::new(),
            format!("Install root: {}", self.install_root),
            format!("Catalog: {}", self.catalog),
            format!("Platform: {}", self.platform),
            format!("Mode: {}", mode_name(self.mode)),
            format!("Parallel downloads: {}", self.jobs),
        ];

        if let Some(manifest) = self.manifest {
            lines.push(format!("Manifest: {manifest}"));
        }

        lines.push(String::new());
        lines.push("Packages to install:".to_owned());
        if self.packages.is_empty() {
            lines.push("  (none)".to_owned());
        }
        for package in self.packages {
            lines.push(format!(
                "  - {} ({}) -> {}",
                package.id, package.description, package.destination_path
            ));
        }

        lines.join("\n")
    }
}

/// Installation state for the `status` command.
#[derive(Debug)]
pub struct StatusInfo<'a> {
    /// The install root inspected.
    pub install_root: &'a Utf8Path,
    /// The detected platform, or why detection failed.
    pub platform: &'a str,
    /// Configured acquisition mode.
    pub mode: InstallMode,
    /// Whether the "installed" marker is present.
    pub installed: bool,
    /// Packages the catalog selects, when it could be read.
    pub packages: Option<&'a [&'a Package]>,
}

impl StatusInfo<'_> {
    /// Format the status for display.
    #[must_use]
    pub fn display_text(&self) -> String {
        let state = if self.installed {
            "installed"
        } else {
            "not installed"
        };
        let mut lines = vec![
            format!("Install root: {}", self.install_root),
            format!("Platform: {}", self.platform),
            format!("Mode: {}", mode_name(self.mode)),
            format!("Runtime dependencies: {state}"),
        ];
        match self.packages {
            Some(packages) => {
                lines.push(format!("Packages for this platform: {}", packages.len()));
                lines.extend(packages.iter().map(|package| format!("  - {}", package.id)));
            }
            None => lines.push("Packages for this platform: unknown (catalog unavailable)".to_owned()),
        }
        lines.join("\n")
    }
}

fn mode_name(mode: InstallMode) -> &'static str {
    match mode {
        InstallMode::Online => "online",
        InstallMode::Offline => "offline",
    }
}

/// Prints stage changes, download progress, and warnings.
///
/// Progress is reported in steps of ten percent per package. In quiet mode
/// only warnings are printed.
pub struct ConsoleObserver<W> {
    out: Mutex<W>,
    quiet: bool,
    last_percent: Mutex<HashMap<String, u8>>,
}

impl<W: Write + Send> ConsoleObserver<W> {
    /// Print to `out`.
    #[must_use]
    pub fn new(out: W, quiet: bool) -> Self {
        Self {
            out: Mutex::new(out),
            quiet,
            last_percent: Mutex::new(HashMap::new()),
        }
    }

    /// Return the underlying writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn line(&self, message: impl std::fmt::Display) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        write_stderr_line(&mut *out, message);
    }
}

impl<W: Write + Send> InstallObserver for ConsoleObserver<W> {
    fn on_stage_changed(&self, _from: MachineState, to: MachineState) {
        if self.quiet {
            return;
        }
        if let MachineState::At(stage) = to {
            self.line(format!("==> {stage}"));
        }
    }

    fn on_progress(&self, progress: &Progress) {
        if self.quiet {
            return;
        }
        let Some(percent) = progress.percent() else {
            return;
        };
        let step = percent / 10 * 10;
        let mut last = self
            .last_percent
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = last.insert(progress.package_id.clone(), step);
        if previous.is_none_or(|previous| previous < step) {
            drop(last);
            self.line(format!("    {}: {step}%", progress.package_id));
        }
    }

    fn on_warning(&self, warning: &InstallWarning) {
        self.line(format!("warning: {}", warning.message));
    }

    fn on_error(&self, report: &FailureReport) {
        if self.quiet {
            return;
        }
        self.line(format!("Installation failed during {}.", report.stage));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;
    use crate::test_utils::PackageSpec;
    use rstest::{fixture, rstest};

    #[fixture]
    fn report() -> RunReport {
        RunReport {
            outcome: RunOutcome::Installed,
            install_type: Some(InstallType::Online),
            packages_installed: vec!["server".to_owned(), "debugger".to_owned()],
            warnings: Vec::new(),
            reload_required: false,
        }
    }

    fn output(observer: ConsoleObserver<Vec<u8>>) -> String {
        String::from_utf8(observer.into_inner()).expect("utf-8 output")
    }

    #[rstest]
    fn success_message_pluralises(report: RunReport) {
        let message = success_message(&report, Utf8Path::new("/opt/runtimes"));
        assert_eq!(message, "Installed 2 runtime packages to /opt/runtimes");
    }

    #[rstest]
    fn success_message_for_offline_runs(mut report: RunReport) {
        report.install_type = Some(InstallType::Offline);
        let message = success_message(&report, Utf8Path::new("/opt/runtimes"));
        assert!(message.starts_with("Verified 2 bundled runtime packages"));
    }

    #[rstest]
    fn success_message_when_already_installed(mut report: RunReport) {
        report.outcome = RunOutcome::AlreadyInstalled;
        let message = success_message(&report, Utf8Path::new("/opt/runtimes"));
        assert!(message.contains("already installed"));
    }

    #[test]
    fn failure_message_includes_hint() {
        let err = InstallerError::ChecksumMismatch {
            package: "server package".to_owned(),
            expected: "aa".to_owned(),
            actual: "bb".to_owned(),
        };
        let message = failure_message(&err);
        assert!(message.starts_with("error: "));
        assert!(message.contains("\nTo recover, "));
    }

    #[test]
    fn dry_run_lists_packages() {
        let package = PackageSpec::new("server").destination("runtimes/server").build();
        let packages = [&package];
        let info = DryRunInfo {
            install_root: Utf8Path::new("/opt/runtimes"),
            catalog: Utf8Path::new("/opt/runtimes/packages.json"),
            manifest: Some(Utf8Path::new("/opt/host/package.json")),
            mode: InstallMode::Offline,
            jobs: 2,
            platform: "linux-x64 (ubuntu 22.04)",
            packages: &packages,
        };

        let text = info.display_text();
        assert!(text.contains("Mode: offline"));
        assert!(text.contains("Manifest: /opt/host/package.json"));
        assert!(text.contains("  - server (server package) -> runtimes/server"));
    }

    #[rstest]
    #[case::installed(true, "Runtime dependencies: installed")]
    #[case::missing(false, "Runtime dependencies: not installed")]
    fn status_reports_marker_state(#[case] installed: bool, #[case] expected: &str) {
        let info = StatusInfo {
            install_root: Utf8Path::new("/opt/runtimes"),
            platform: "linux-x64",
            mode: InstallMode::Online,
            installed,
            packages: None,
        };
        let text = info.display_text();
        assert!(text.contains(expected));
        assert!(text.contains("catalog unavailable"));
    }

    #[test]
    fn console_reports_progress_in_ten_percent_steps() {
        let observer = ConsoleObserver::new(Vec::new(), false);
        for downloaded in [5, 12, 18, 35, 100] {
            observer.on_progress(&Progress {
                package_id: "server".to_owned(),
                bytes_downloaded: downloaded,
                total_bytes: Some(100),
            });
        }

        let text = output(observer);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec!["    server: 0%", "    server: 10%", "    server: 30%", "    server: 100%"]
        );
    }

    #[test]
    fn quiet_console_only_prints_warnings() {
        let observer = ConsoleObserver::new(Vec::new(), true);
        observer.on_stage_changed(
            MachineState::At(Stage::NotStarted),
            MachineState::At(Stage::ProbingPlatform),
        );
        observer.on_warning(&InstallWarning {
            kind: crate::error::ErrorKind::PermissionDenied,
            message: "could not mark bin/server executable".to_owned(),
        });

        assert_eq!(
            output(observer),
            "warning: could not mark bin/server executable\n"
        );
    }
}
