//! Shared test utilities for the installer crate.
//!
//! Available to unit tests and, through the `test-support` feature, to the
//! behaviour tests under `tests/`.

use crate::artefact::extraction::ArchiveFormat;
use crate::artefact::sha256_digest::Sha256Digest;
use crate::artefact::transport::{Transport, TransportError, TransportResponse};
use crate::catalog::Package;
use crate::observer::{FailureReport, InstallObserver, InstallWarning, Progress};
use crate::platform::{Architecture, HostFacts, OperatingSystem};
use crate::stage::MachineState;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use camino::Utf8PathBuf;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256Digest::of_bytes(bytes).to_string()
}

/// Build an in-memory zip archive from `(path, contents)` pairs.
///
/// # Panics
///
/// Panics if the archive cannot be written.
pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().unix_permissions(0o644);
    for (path, contents) in entries {
        writer.start_file(*path, options).expect("start zip entry");
        writer.write_all(contents).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, *contents)
            .expect("append tar entry");
    }
    builder.into_inner().expect("finish tar")
}

/// Build an in-memory `.tar.gz` archive from `(path, contents)` pairs.
///
/// # Panics
///
/// Panics if the archive cannot be written.
pub fn tar_gz_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(&tar_bytes(entries))
        .expect("compress tar");
    encoder.finish().expect("finish gzip")
}

/// Build an in-memory `.tar.zst` archive from `(path, contents)` pairs.
///
/// # Panics
///
/// Panics if the archive cannot be written.
pub fn tar_zst_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    zstd::encode_all(tar_bytes(entries).as_slice(), 3).expect("compress tar")
}

/// Builder for catalog packages with test-friendly defaults.
///
/// Defaults: Linux only, every architecture, a zip archive at
/// `https://example.test/<id>.zip` whose checksum is that of an empty
/// payload, installed at `<id>`.
#[derive(Debug, Clone)]
pub struct PackageSpec {
    package: Package,
}

impl PackageSpec {
    /// Start a package called `id`.
    pub fn new(id: &str) -> Self {
        Self {
            package: Package {
                id: id.to_owned(),
                description: format!("{id} package"),
                url: format!("https://example.test/{id}.zip"),
                checksum: Sha256Digest::of_bytes(b""),
                destination_path: Utf8PathBuf::from(id),
                platforms: BTreeSet::from([OperatingSystem::Linux]),
                architectures: None,
                binaries: Vec::new(),
                archive_format: None,
            },
        }
    }

    /// Set the operating systems.
    pub fn platforms(mut self, platforms: &[OperatingSystem]) -> Self {
        self.package.platforms = platforms.iter().copied().collect();
        self
    }

    /// Restrict to the given architectures.
    pub fn architectures(mut self, architectures: &[Architecture]) -> Self {
        self.package.architectures = Some(architectures.iter().copied().collect());
        self
    }

    /// Set the destination relative to the install root.
    pub fn destination(mut self, destination: &str) -> Self {
        self.package.destination_path = Utf8PathBuf::from(destination);
        self
    }

    /// Set the executables relative to the destination.
    pub fn binaries(mut self, binaries: &[&str]) -> Self {
        self.package.binaries = binaries.iter().map(Utf8PathBuf::from).collect();
        self
    }

    /// Set the download URL.
    pub fn url(mut self, url: &str) -> Self {
        self.package.url = url.to_owned();
        self
    }

    /// Set the checksum to the digest of `archive`.
    pub fn archive(mut self, archive: &[u8]) -> Self {
        self.package.checksum = Sha256Digest::of_bytes(archive);
        self
    }

    /// Set an explicit archive format.
    pub fn format(mut self, format: ArchiveFormat) -> Self {
        self.package.archive_format = Some(format);
        self
    }

    /// Finish the package.
    pub fn build(self) -> Package {
        self.package
    }
}

/// A scripted transport reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubReply {
    /// Serve these bytes.
    Body(Vec<u8>),
    /// Fail with this HTTP status.
    Status(u16),
    /// Fail with a connection error.
    ConnectionReset,
    /// Fail with a timeout.
    Timeout,
}

/// In-memory [`Transport`] with call accounting.
///
/// Each URL has a queue of replies; the last reply repeats. Unknown URLs
/// answer 404. An optional latency is spent inside `open` so concurrent
/// callers overlap and the high-water mark of simultaneous opens is
/// observable.
#[derive(Debug, Default)]
pub struct StubTransport {
    routes: Mutex<HashMap<String, VecDeque<StubReply>>>,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    latency: Duration,
}

impl StubTransport {
    /// An empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Always serve `body` at `url`.
    pub fn serve(self, url: &str, body: Vec<u8>) -> Self {
        self.reply_sequence(url, vec![StubReply::Body(body)])
    }

    /// Reply to `url` with `replies` in order, repeating the last.
    pub fn reply_sequence(self, url: &str, replies: Vec<StubReply>) -> Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_owned(), replies.into());
        self
    }

    /// Spend `latency` inside every `open`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Total number of `open` calls.
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of `open` calls for `url`.
    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|called| called.as_str() == url)
            .count()
    }

    /// Highest number of simultaneous `open` calls seen.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn next_reply(&self, url: &str) -> StubReply {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        match routes.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(StubReply::Status(404)),
            Some(queue) => queue.front().cloned().unwrap_or(StubReply::Status(404)),
            None => StubReply::Status(404),
        }
    }
}

impl Transport for StubTransport {
    fn open(&self, url: &str) -> Result<TransportResponse, TransportError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_owned());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let reply = self.next_reply(url);
        self.active.fetch_sub(1, Ordering::SeqCst);

        match reply {
            StubReply::Body(bytes) => Ok(TransportResponse::from_bytes(bytes)),
            StubReply::Status(status) => Err(TransportError::Status { status }),
            StubReply::ConnectionReset => Err(TransportError::Connection {
                reason: "connection reset by peer".to_owned(),
            }),
            StubReply::Timeout => Err(TransportError::Timeout),
        }
    }
}

/// Fixed [`HostFacts`] for a simulated machine.
#[derive(Debug, Clone)]
pub struct StaticHostFacts {
    /// Rust-style OS name.
    pub os: String,
    /// Rust-style architecture name.
    pub arch: String,
    /// `os-release` contents.
    pub os_release: Option<String>,
    /// Whether a musl loader exists.
    pub musl_loader: bool,
    /// Whether a glibc loader exists.
    pub glibc_loader: bool,
}

impl StaticHostFacts {
    /// A glibc machine with the given Rust-style OS and architecture.
    pub fn new(os: &str, arch: &str) -> Self {
        Self {
            os: os.to_owned(),
            arch: arch.to_owned(),
            os_release: Some("ID=ubuntu\nVERSION_ID=\"22.04\"\n".to_owned()),
            musl_loader: false,
            glibc_loader: true,
        }
    }

    /// Ubuntu on x86-64.
    pub fn linux_x64() -> Self {
        Self::new("linux", "x86_64")
    }
}

impl HostFacts for StaticHostFacts {
    fn os(&self) -> String {
        self.os.clone()
    }

    fn arch(&self) -> String {
        self.arch.clone()
    }

    fn os_release(&self) -> Option<String> {
        self.os_release.clone()
    }

    fn has_musl_loader(&self) -> bool {
        self.musl_loader
    }

    fn has_glibc_loader(&self) -> bool {
        self.glibc_loader
    }
}

/// Observer that records every notification.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    transitions: Mutex<Vec<(MachineState, MachineState)>>,
    progress: Mutex<Vec<Progress>>,
    warnings: Mutex<Vec<InstallWarning>>,
    errors: Mutex<Vec<FailureReport>>,
}

impl RecordingObserver {
    /// Recorded transitions, in order.
    pub fn transitions(&self) -> Vec<(MachineState, MachineState)> {
        self.transitions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The states entered, in order.
    pub fn states(&self) -> Vec<MachineState> {
        self.transitions().into_iter().map(|(_, to)| to).collect()
    }

    /// Recorded progress notifications.
    pub fn progress(&self) -> Vec<Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Recorded warnings.
    pub fn warnings(&self) -> Vec<InstallWarning> {
        self.warnings.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Recorded failure reports.
    pub fn errors(&self) -> Vec<FailureReport> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl InstallObserver for RecordingObserver {
    fn on_stage_changed(&self, from: MachineState, to: MachineState) {
        self.transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((from, to));
    }

    fn on_progress(&self, progress: &Progress) {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(progress.clone());
    }

    fn on_warning(&self, warning: &InstallWarning) {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(warning.clone());
    }

    fn on_error(&self, report: &FailureReport) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
    }
}

/// Telemetry sink that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingSink {
    /// Events emitted so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl TelemetrySink for RecordingSink {
    fn emit(&self, event: &TelemetryEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
