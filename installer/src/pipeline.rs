//! The installation state machine.
//!
//! [`InstallationStateMachine`] sequences one run: probe the platform,
//! acquire packages (downloading them or verifying the bundled copies),
//! mark binaries executable, rewrite the host manifest, clean up, and
//! finally write the "installed" marker. It is the only writer of that
//! marker and reports every transition to the [`InstallObserver`].
//!
//! ```text
//! NotStarted -> ProbingPlatform -> OnlinePath | OfflinePath
//!            -> MakingExecutable -> RewritingManifest -> PostInstall
//!            -> Completed
//! ```
//!
//! Any stage may end in `Failed(stage)`.

use crate::artefact::extraction::ArchiveExtractor;
use crate::artefact::transport::Transport;
use crate::cancel::CancellationToken;
use crate::catalog::{Package, PackageCatalog};
use crate::config::{InstallMode, InstallerConfig};
use crate::download::{Downloader, RetryPolicy};
use crate::error::{ErrorKind, InstallerError, Result};
use crate::install::{InstalledPackage, Installer};
use crate::lock::{InstallLockMarker, RunGuard};
use crate::manifest::{ManifestRewrite, rewrite_manifest};
use crate::observer::{FailureReport, InstallObserver, InstallWarning};
use crate::permissions::mark_executable;
use crate::platform::{HostFacts, PlatformInfo, PlatformProbe};
use crate::stage::{InstallType, InstallationInformation, MachineState, Stage};
use crate::telemetry::{TelemetryReporter, TelemetrySink, keys};
use camino::Utf8Path;
use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Directory inside the install root where archives are staged.
pub const STAGING_DIR_NAME: &str = ".staging";

/// Name of the telemetry event emitted once per run.
pub const TELEMETRY_EVENT_NAME: &str = "runtimeAcquisition";

/// Default number of concurrent package downloads.
pub const DEFAULT_JOBS: usize = 4;

/// Per-run settings, fixed when the run starts.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Where packages, the marker, and staging live.
    pub install_root: PathBuf,
    /// Whether to download or verify bundled packages.
    pub mode: InstallMode,
    /// Maximum concurrent package downloads.
    pub jobs: usize,
    /// Download retry policy.
    pub retry: RetryPolicy,
    /// Host manifest to rewrite, if any.
    pub manifest: Option<PathBuf>,
    /// Changes applied to the manifest.
    pub manifest_rewrite: ManifestRewrite,
    /// Remove destinations of packages for other platforms.
    pub prune_foreign_packages: bool,
    /// Caller-controlled cancellation.
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Default settings for an online run into `install_root`.
    #[must_use]
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            mode: InstallMode::Online,
            jobs: DEFAULT_JOBS,
            retry: RetryPolicy::default(),
            manifest: None,
            manifest_rewrite: ManifestRewrite::default(),
            prune_foreign_packages: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Settings derived from configuration.
    #[must_use]
    pub fn from_config(config: &InstallerConfig, install_root: &Utf8Path) -> Self {
        Self {
            install_root: install_root.as_std_path().to_path_buf(),
            mode: config.mode,
            jobs: config.jobs,
            retry: config.retry_policy(),
            manifest: config
                .manifest
                .as_ref()
                .map(|path| path.as_std_path().to_path_buf()),
            manifest_rewrite: config.manifest_rewrite(),
            prune_foreign_packages: config.prune_foreign_packages,
            cancel: CancellationToken::new(),
        }
    }
}

/// External collaborators of a run.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Source of host platform facts.
    pub host: &'a dyn HostFacts,
    /// Opens remote archives.
    pub transport: &'a dyn Transport,
    /// Unpacks archives.
    pub extractor: &'a dyn ArchiveExtractor,
    /// Receives progress and stage notifications.
    pub observer: &'a dyn InstallObserver,
    /// Receives the run's telemetry event.
    pub telemetry: &'a dyn TelemetrySink,
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Packages were installed or verified in this run.
    Installed,
    /// The marker was present; nothing was done.
    AlreadyInstalled,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// The acquisition path taken, if any.
    pub install_type: Option<InstallType>,
    /// Ids of the packages installed or verified, in catalog order.
    pub packages_installed: Vec<String>,
    /// Non-fatal problems encountered.
    pub warnings: Vec<InstallWarning>,
    /// Whether the host must reload to pick up a rewritten manifest.
    pub reload_required: bool,
}

/// Shared, read-only view of a machine's current state.
#[derive(Debug, Clone, Default)]
pub struct StageHandle(Arc<Mutex<MachineState>>);

impl StageHandle {
    /// The state at the time of the call.
    #[must_use]
    pub fn current(&self) -> MachineState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: MachineState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Supervises one installation run.
pub struct InstallationStateMachine<'a> {
    context: RunContext,
    catalog: &'a PackageCatalog,
    services: Collaborators<'a>,
    info: InstallationInformation,
    handle: StageHandle,
}

impl<'a> InstallationStateMachine<'a> {
    /// Prepare a run over `catalog`.
    #[must_use]
    pub fn new(
        context: RunContext,
        catalog: &'a PackageCatalog,
        services: Collaborators<'a>,
    ) -> Self {
        Self {
            context,
            catalog,
            services,
            info: InstallationInformation::new(TelemetryReporter::new(TELEMETRY_EVENT_NAME)),
            handle: StageHandle::default(),
        }
    }

    /// The current state.
    #[must_use]
    pub fn current_stage(&self) -> MachineState {
        self.info.state()
    }

    /// A handle that keeps reporting the state while and after the run.
    #[must_use]
    pub fn stage_handle(&self) -> StageHandle {
        self.handle.clone()
    }

    /// The run record.
    #[must_use]
    pub fn information(&self) -> &InstallationInformation {
        &self.info
    }

    /// Execute the run.
    ///
    /// Telemetry is emitted exactly once whatever the outcome. On failure
    /// the observer receives a [`FailureReport`] before this returns.
    ///
    /// # Errors
    ///
    /// Returns the first error that halted the run. The marker is never
    /// written when an error is returned.
    pub fn run(mut self) -> Result<RunReport> {
        let started = Instant::now();
        let result = self.run_stages();

        let elapsed = started.elapsed().as_millis();
        self.info
            .telemetry
            .record(keys::DURATION_MS, elapsed.to_string());
        match &result {
            Ok(report) => self.record_success(report),
            Err(err) => self.fail(err),
        }
        self.info.telemetry.flush(self.services.telemetry);
        result
    }

    fn run_stages(&mut self) -> Result<RunReport> {
        let root = self.context.install_root.clone();
        fs::create_dir_all(&root)?;
        let _guard = RunGuard::acquire(&root)?;

        let marker = InstallLockMarker::in_root(&root);
        if marker.exists() {
            info!("runtime dependencies already installed in {}", root.display());
            self.transition(Stage::Completed);
            return Ok(RunReport {
                outcome: RunOutcome::AlreadyInstalled,
                install_type: None,
                packages_installed: Vec::new(),
                warnings: Vec::new(),
                reload_required: false,
            });
        }

        self.advance(Stage::ProbingPlatform)?;
        let catalog = self.catalog;
        let platform = self.probe()?;
        let selected = catalog.select(&platform);
        self.info
            .telemetry
            .record(keys::PACKAGE_COUNT, selected.len().to_string());

        let install_type = match self.context.mode {
            InstallMode::Online => InstallType::Online,
            InstallMode::Offline => InstallType::Offline,
        };
        self.info.install_type = Some(install_type);
        self.info
            .telemetry
            .record(keys::INSTALL_TYPE, install_type.as_str());
        let installed = match install_type {
            InstallType::Online => {
                self.advance(Stage::OnlinePath)?;
                self.acquire(&selected)?
            }
            InstallType::Offline => {
                self.advance(Stage::OfflinePath)?;
                self.verify_bundled(&selected)?
            }
        };

        self.advance(Stage::MakingExecutable)?;
        let binaries: Vec<PathBuf> = installed
            .iter()
            .flat_map(|record| record.binaries.iter().cloned())
            .collect();
        let mut warnings = mark_executable(&binaries);
        self.report_warnings(&warnings);

        self.advance(Stage::RewritingManifest)?;
        let reload_required = match &self.context.manifest {
            Some(path) => rewrite_manifest(path, &self.context.manifest_rewrite)?,
            None => false,
        };

        self.advance(Stage::PostInstall)?;
        let cleanup_warnings = self.post_install(&platform, &selected);
        self.report_warnings(&cleanup_warnings);
        warnings.extend(cleanup_warnings);

        if install_type == InstallType::Online {
            marker.create()?;
        }
        self.transition(Stage::Completed);

        Ok(RunReport {
            outcome: RunOutcome::Installed,
            install_type: Some(install_type),
            packages_installed: installed.into_iter().map(|record| record.package_id).collect(),
            warnings,
            reload_required,
        })
    }

    fn probe(&mut self) -> Result<PlatformInfo> {
        // Raw host names first, so an unsupported host is still identifiable.
        let host = self.services.host;
        self.info
            .telemetry
            .record(keys::PLATFORM, format!("{}-{}", host.os(), host.arch()));
        let platform = PlatformProbe::new(host)
            .with_architectures(self.catalog.declared_architectures())
            .detect()?;
        self.info.telemetry.record(
            keys::PLATFORM,
            format!("{}-{}", platform.operating_system, platform.architecture),
        );
        if let Some(distribution) = &platform.distribution {
            self.info
                .telemetry
                .record(keys::DISTRIBUTION, distribution.to_string());
        }
        self.catalog.ensure_supported(&platform)?;
        info!("installing runtime dependencies for {platform}");
        Ok(platform)
    }

    fn acquire(&self, selected: &[&'a Package]) -> Result<Vec<InstalledPackage>> {
        if selected.is_empty() {
            return Ok(Vec::new());
        }
        let root = &self.context.install_root;
        let downloader = Downloader::new(self.services.transport, root.join(STAGING_DIR_NAME))
            .with_retry_policy(self.context.retry);
        let installer = Installer::new(self.services.extractor, root);
        let observer = self.services.observer;
        let cancel = self.context.cancel.child();
        let workers = self.context.jobs.clamp(1, selected.len());
        info!(
            "installing {} package(s) with {workers} worker(s)",
            selected.len()
        );

        let (work_tx, work_rx) = crossbeam_channel::unbounded::<&Package>();
        for package in selected.iter().copied() {
            if work_tx.send(package).is_err() {
                break;
            }
        }
        drop(work_tx);

        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        std::thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let (downloader, installer, cancel) = (&downloader, &installer, &cancel);
                scope.spawn(move || {
                    for package in work_rx.iter() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let outcome =
                            install_package(package, downloader, installer, observer, cancel);
                        if outcome.is_err() {
                            cancel.cancel();
                        }
                        if result_tx.send((package.id.clone(), outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut installed = Vec::with_capacity(selected.len());
        let mut first_error: Option<InstallerError> = None;
        for (package_id, outcome) in result_rx.iter() {
            match outcome {
                Ok(record) => installed.push(record),
                Err(err) => {
                    debug!("package {package_id} failed: {err}");
                    let is_root_cause = match &first_error {
                        None => true,
                        Some(InstallerError::Cancelled) => !matches!(err, InstallerError::Cancelled),
                        Some(_) => false,
                    };
                    if is_root_cause {
                        first_error = Some(err);
                    }
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        if installed.len() < selected.len() {
            return Err(InstallerError::Cancelled);
        }

        installed.sort_by_key(|record| {
            selected
                .iter()
                .position(|package| package.id == record.package_id)
        });
        Ok(installed)
    }

    fn verify_bundled(&self, selected: &[&Package]) -> Result<Vec<InstalledPackage>> {
        let root = &self.context.install_root;
        selected
            .iter()
            .map(|package| {
                let destination = package.destination_in(root);
                if !destination.is_dir() {
                    return Err(InstallerError::MissingBundledPackage {
                        package: package.description.clone(),
                        path: destination,
                    });
                }
                debug!("bundled {} present at {}", package.id, destination.display());
                Ok(InstalledPackage {
                    package_id: package.id.clone(),
                    binaries: package.binaries_in(root),
                    destination,
                    files: Vec::new(),
                })
            })
            .collect()
    }

    fn post_install(&self, platform: &PlatformInfo, selected: &[&Package]) -> Vec<InstallWarning> {
        let root = &self.context.install_root;
        let mut warnings = Vec::new();

        let staging = root.join(STAGING_DIR_NAME);
        if staging.exists() {
            if let Err(err) = fs::remove_dir_all(&staging) {
                warnings.push(cleanup_warning(&staging, &err));
            }
        }

        if self.context.prune_foreign_packages {
            let kept: Vec<PathBuf> = selected
                .iter()
                .map(|package| package.destination_in(root))
                .collect();
            for package in self.catalog.foreign_packages(platform) {
                let destination = package.destination_in(root);
                let overlaps = kept
                    .iter()
                    .any(|keep| keep.starts_with(&destination) || destination.starts_with(keep));
                if overlaps || !destination.exists() {
                    continue;
                }
                match fs::remove_dir_all(&destination) {
                    Ok(()) => info!("removed {} (not used on {platform})", package.id),
                    Err(err) => warnings.push(cleanup_warning(&destination, &err)),
                }
            }
        }
        warnings
    }

    fn report_warnings(&self, warnings: &[InstallWarning]) {
        for warning in warnings {
            warn!("{}", warning.message);
            self.services.observer.on_warning(warning);
        }
    }

    fn advance(&mut self, stage: Stage) -> Result<()> {
        self.context.cancel.check()?;
        self.transition(stage);
        Ok(())
    }

    fn transition(&mut self, stage: Stage) {
        let from = self.info.state();
        self.info.stage = stage;
        let to = self.info.state();
        self.handle.set(to);
        self.info.telemetry.record(keys::STAGE, stage.as_str());
        debug!("stage {from} -> {to}");
        self.services.observer.on_stage_changed(from, to);
    }

    fn record_success(&mut self, report: &RunReport) {
        let outcome = match report.outcome {
            RunOutcome::Installed => "success",
            RunOutcome::AlreadyInstalled => "alreadyInstalled",
        };
        let telemetry = &mut self.info.telemetry;
        telemetry.record(keys::OUTCOME, outcome);
        telemetry.record(keys::WARNING_COUNT, report.warnings.len().to_string());
    }

    fn fail(&mut self, err: &InstallerError) {
        let from = self.info.state();
        self.info.has_error = true;
        let to = self.info.state();
        self.handle.set(to);
        self.services.observer.on_stage_changed(from, to);

        let report = FailureReport::new(self.info.stage, err);
        error!("installation failed during {}: {}", report.stage, report.message);

        let telemetry = &mut self.info.telemetry;
        telemetry.record(keys::OUTCOME, "failure");
        telemetry.record(keys::ERROR_KIND, report.kind.as_str());
        telemetry.record(keys::ERROR_STAGE, report.stage.as_str());
        telemetry.record(keys::ERROR_MESSAGE, report.message.clone());
        if let Some(package) = &report.package {
            telemetry.record_sanitized(keys::ERROR_PACKAGE, package);
        }
        self.services.observer.on_error(&report);
    }
}

fn install_package(
    package: &Package,
    downloader: &Downloader<'_>,
    installer: &Installer<'_>,
    observer: &dyn InstallObserver,
    cancel: &CancellationToken,
) -> Result<InstalledPackage> {
    cancel.check()?;
    info!("downloading {}", package.description);
    let download = downloader.fetch(package, &|progress| observer.on_progress(progress), cancel)?;

    // An install is never interrupted once started; this is the last
    // cancellation point for the package.
    if let Err(err) = cancel.check() {
        if let Err(remove_err) = fs::remove_file(&download.archive_path) {
            debug!("could not remove {}: {remove_err}", download.archive_path.display());
        }
        return Err(err);
    }
    installer.install(&download)
}

fn cleanup_warning(path: &Path, err: &std::io::Error) -> InstallWarning {
    InstallWarning {
        kind: ErrorKind::Io,
        message: format!("could not remove {}: {err}", path.display()),
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
