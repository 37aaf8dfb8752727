//! Runtime installer CLI entrypoint.
//!
//! This binary installs the runtime dependencies of a host tool: it loads
//! the configuration and package catalog, drives the installation state
//! machine, and reports the outcome on stderr and in the install log.

use camino::Utf8Path;
use clap::Parser;
use runtime_installer::artefact::extraction::StandardExtractor;
use runtime_installer::artefact::transport::HttpTransport;
use runtime_installer::catalog::PackageCatalog;
use runtime_installer::cli::{Cli, Command, InstallArgs, LocationArgs, StatusArgs};
use runtime_installer::config::InstallerConfig;
use runtime_installer::dirs::{BaseDirs, SystemBaseDirs};
use runtime_installer::error::{InstallerError, Result};
use runtime_installer::install_metrics::{RunMetric, record_run};
use runtime_installer::lock::InstallLockMarker;
use runtime_installer::observer::{CompositeObserver, LogFileObserver};
use runtime_installer::output::{
    ConsoleObserver, DryRunInfo, RELOAD_NOTICE, StatusInfo, failure_message, success_message,
    write_stderr_line,
};
use runtime_installer::pipeline::{
    Collaborators, InstallationStateMachine, RunContext, RunOutcome, RunReport,
};
use runtime_installer::platform::{PlatformProbe, SystemHostFacts};
use runtime_installer::telemetry::LogSink;
use std::io::Write;
use std::time::{Duration, Instant};

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn init_logging(cli: &Cli) {
    let level = cli.install_args().log_level();
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .format_target(false);
    if builder.try_init().is_err() {
        // A logger is already installed.
    }
}

fn run(cli: &Cli, stderr: &mut dyn Write) -> Result<()> {
    let dirs = SystemBaseDirs::new().ok_or_else(|| InstallerError::InvalidConfig {
        reason: "could not determine the home directory".to_owned(),
    })?;

    match &cli.command {
        Some(Command::Status(args)) => run_status(args, &dirs, stderr),
        Some(Command::Install(_)) | None => run_install(cli.install_args(), &dirs, stderr),
    }
}

/// Loads configuration, applying the command-line overrides.
fn load_config(
    locations: &LocationArgs,
    dirs: &dyn BaseDirs,
    apply: impl FnOnce(&mut InstallerConfig),
) -> Result<InstallerConfig> {
    let explicit = locations.config.as_deref().map(Utf8Path::as_std_path);
    let mut config = InstallerConfig::discover(dirs, explicit)?;
    apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn run_install(args: &InstallArgs, dirs: &dyn BaseDirs, stderr: &mut dyn Write) -> Result<()> {
    let config = load_config(&args.locations, dirs, |config| args.apply(config))?;
    let install_root = config.resolve_install_root(dirs)?;
    let catalog_path = config.resolve_catalog(&install_root);
    let catalog = PackageCatalog::load(&catalog_path)?;

    if args.dry_run {
        return print_dry_run(&config, &install_root, &catalog_path, &catalog, stderr);
    }

    std::fs::create_dir_all(&install_root)?;
    let log_file = LogFileObserver::open(
        install_root
            .join(LogFileObserver::FILE_NAME)
            .as_std_path(),
    )?;
    let console = ConsoleObserver::new(std::io::stderr(), args.quiet);
    let observer = CompositeObserver::new().with(&console).with(&log_file);
    let transport = HttpTransport::new(config.attempt_timeout());
    let services = Collaborators {
        host: &SystemHostFacts,
        transport: &transport,
        extractor: &StandardExtractor,
        observer: &observer,
        telemetry: &LogSink,
    };

    let machine = InstallationStateMachine::new(
        RunContext::from_config(&config, &install_root),
        &catalog,
        services,
    );
    let started = Instant::now();
    let result = machine.run();
    record_metrics(dirs, &result, started.elapsed(), args.quiet, stderr);

    match result {
        Ok(report) => {
            report_success(&report, &install_root, args.quiet, stderr);
            Ok(())
        }
        Err(err) => {
            write_stderr_line(
                stderr,
                format!("Details were written to {}", log_file.path().display()),
            );
            Err(err)
        }
    }
}

fn report_success(
    report: &RunReport,
    install_root: &Utf8Path,
    quiet: bool,
    stderr: &mut dyn Write,
) {
    if !quiet {
        write_stderr_line(stderr, success_message(report, install_root));
        if !report.warnings.is_empty() {
            write_stderr_line(
                stderr,
                format!("Completed with {} warning(s).", report.warnings.len()),
            );
        }
    }
    if report.reload_required {
        write_stderr_line(stderr, RELOAD_NOTICE);
    }
}

/// Records local metrics; failures to do so never fail the run.
fn record_metrics(
    dirs: &dyn BaseDirs,
    result: &Result<RunReport>,
    duration: Duration,
    quiet: bool,
    stderr: &mut dyn Write,
) {
    let metric = match result {
        Ok(report) if report.outcome == RunOutcome::AlreadyInstalled => return,
        Ok(report) => match report.install_type {
            Some(install_type) => RunMetric::Installed(install_type),
            None => return,
        },
        Err(_) => RunMetric::Failed,
    };

    match record_run(dirs, metric, duration) {
        Ok(outcome) => {
            if outcome.recovered_from_corrupt_file() {
                log::warn!("install metrics were unreadable and have been reset");
            }
            if !quiet {
                write_stderr_line(stderr, outcome.metrics().summary_line());
            }
        }
        Err(err) => log::debug!("could not record install metrics: {err}"),
    }
}

fn print_dry_run(
    config: &InstallerConfig,
    install_root: &Utf8Path,
    catalog_path: &Utf8Path,
    catalog: &PackageCatalog,
    stderr: &mut dyn Write,
) -> Result<()> {
    let platform = PlatformProbe::new(&SystemHostFacts)
        .with_architectures(catalog.declared_architectures())
        .detect()?;
    catalog.ensure_supported(&platform)?;
    let packages = catalog.select(&platform);
    let platform_text = platform.to_string();

    let info = DryRunInfo {
        install_root,
        catalog: catalog_path,
        manifest: config.manifest.as_deref(),
        mode: config.mode,
        jobs: config.jobs,
        platform: &platform_text,
        packages: &packages,
    };
    write_stderr_line(stderr, info.display_text());
    Ok(())
}

fn run_status(args: &StatusArgs, dirs: &dyn BaseDirs, stderr: &mut dyn Write) -> Result<()> {
    let config = load_config(&args.locations, dirs, |config| args.locations.apply(config))?;
    let install_root = config.resolve_install_root(dirs)?;
    let installed = InstallLockMarker::in_root(install_root.as_std_path()).exists();

    let catalog = PackageCatalog::load(&config.resolve_catalog(&install_root));
    if let Err(err) = &catalog {
        log::debug!("catalog unavailable: {err}");
    }
    let probe = PlatformProbe::new(&SystemHostFacts).with_architectures(
        catalog
            .as_ref()
            .map(PackageCatalog::declared_architectures)
            .unwrap_or_default(),
    );
    let platform = probe.detect();
    let platform_text = match &platform {
        Ok(platform) => platform.to_string(),
        Err(err) => format!("unsupported ({err})"),
    };
    let packages = match (&catalog, &platform) {
        (Ok(catalog), Ok(platform)) => Some(catalog.select(platform)),
        _ => None,
    };

    let info = StatusInfo {
        install_root: &install_root,
        platform: &platform_text,
        mode: config.mode,
        installed,
        packages: packages.as_deref(),
    };
    write_stderr_line(stderr, info.display_text());
    Ok(())
}

fn exit_code_for_run_result(result: Result<()>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            write_stderr_line(stderr, failure_message(&err));
            1
        }
    }
}
