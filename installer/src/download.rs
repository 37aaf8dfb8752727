//! Archive download with retry, progress, and checksum verification.
//!
//! The [`Downloader`] streams one package archive into the staging
//! directory, hashing it on the fly. Transient transport failures are
//! retried with exponential backoff; a checksum mismatch is final and the
//! staged file is deleted so it can never be installed.

use crate::artefact::sha256_digest::Sha256Digest;
use crate::artefact::transport::{Transport, TransportError};
use crate::cancel::CancellationToken;
use crate::catalog::Package;
use crate::error::{InstallerError, Result};
use crate::observer::Progress;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Bytes between two progress notifications.
pub const PROGRESS_INTERVAL_BYTES: u64 = 256 * 1024;

const CHUNK_SIZE: usize = 64 * 1024;
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Bounded retry with exponential backoff.
///
/// The first attempt runs immediately; attempt `n > 1` waits
/// `base_delay * 2^(n - 2)`.
///
/// # Examples
///
/// ```
/// use runtime_installer::download::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.delay_before(1), Duration::ZERO);
/// assert_eq!(policy.delay_before(2), Duration::from_secs(2));
/// assert_eq!(policy.delay_before(3), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// The backoff applied before the given 1-based attempt.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(2).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

/// A downloaded archive handed to the installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    /// The package the archive belongs to.
    pub package: Package,
    /// Location of the staged archive.
    pub archive_path: PathBuf,
    /// Whether the archive matched the catalogued checksum.
    pub verified: bool,
}

/// Fetches package archives into a staging directory.
pub struct Downloader<'a> {
    transport: &'a dyn Transport,
    staging_dir: PathBuf,
    retry: RetryPolicy,
}

enum AttemptError {
    Transport(TransportError),
    Local(InstallerError),
}

impl<'a> Downloader<'a> {
    /// Create a downloader staging archives under `staging_dir`.
    #[must_use]
    pub fn new(transport: &'a dyn Transport, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            staging_dir: staging_dir.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Where the archive for `package` is staged.
    #[must_use]
    pub fn staged_path(&self, package: &Package) -> PathBuf {
        self.staging_dir.join(format!("{}.download", package.id))
    }

    /// Download and verify the archive for `package`.
    ///
    /// `on_progress` is called at most once per
    /// [`PROGRESS_INTERVAL_BYTES`] and once when an attempt completes.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::NetworkFailure`] once retries are exhausted
    /// or on a non-retryable failure, [`InstallerError::ChecksumMismatch`]
    /// when the archive does not match, and [`InstallerError::Cancelled`]
    /// when `cancel` fires. The staged file is removed on every failure.
    pub fn fetch(
        &self,
        package: &Package,
        on_progress: &dyn Fn(&Progress),
        cancel: &CancellationToken,
    ) -> Result<DownloadResult> {
        fs::create_dir_all(&self.staging_dir)?;
        let archive_path = self.staged_path(package);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if let Err(err) = wait_for_attempt(self.retry.delay_before(attempt), cancel) {
                remove_staged(&archive_path);
                return Err(err);
            }
            debug!("fetching {} (attempt {attempt}/{max_attempts})", package.url);

            match self.attempt(package, &archive_path, on_progress, cancel) {
                Ok(actual) => return verify(package, archive_path, &actual),
                Err(AttemptError::Local(err)) => {
                    remove_staged(&archive_path);
                    return Err(err);
                }
                Err(AttemptError::Transport(err)) => {
                    remove_staged(&archive_path);
                    if !err.is_retryable() {
                        return Err(network_failure(package, &err, false));
                    }
                    warn!(
                        "attempt {attempt}/{max_attempts} for {} failed: {err}",
                        package.description
                    );
                    last_error = Some(err);
                }
            }
        }

        let err = last_error.unwrap_or(TransportError::Timeout);
        Err(network_failure(package, &err, true))
    }

    fn attempt(
        &self,
        package: &Package,
        archive_path: &Path,
        on_progress: &dyn Fn(&Progress),
        cancel: &CancellationToken,
    ) -> std::result::Result<Sha256Digest, AttemptError> {
        let response = self
            .transport
            .open(&package.url)
            .map_err(AttemptError::Transport)?;
        let mut body = response.body;
        let mut file = fs::File::create(archive_path)
            .map_err(|e| AttemptError::Local(InstallerError::Io(e)))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut progress = Progress {
            package_id: package.id.clone(),
            bytes_downloaded: 0,
            total_bytes: response.content_length,
        };
        let mut last_reported = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(AttemptError::Local(InstallerError::Cancelled));
            }
            let read = body
                .read(&mut buffer)
                .map_err(|e| AttemptError::Transport(TransportError::Io(e)))?;
            if read == 0 {
                break;
            }
            let chunk = buffer.get(..read).unwrap_or_default();
            hasher.update(chunk);
            file.write_all(chunk)
                .map_err(|e| AttemptError::Local(InstallerError::Io(e)))?;

            progress.bytes_downloaded = progress.bytes_downloaded.saturating_add(read as u64);
            if progress.bytes_downloaded - last_reported >= PROGRESS_INTERVAL_BYTES {
                last_reported = progress.bytes_downloaded;
                on_progress(&progress);
            }
        }

        file.flush()
            .map_err(|e| AttemptError::Local(InstallerError::Io(e)))?;
        on_progress(&progress);
        Ok(Sha256Digest::from_hasher(hasher))
    }
}

fn verify(package: &Package, archive_path: PathBuf, actual: &Sha256Digest) -> Result<DownloadResult> {
    if *actual != package.checksum {
        remove_staged(&archive_path);
        return Err(InstallerError::ChecksumMismatch {
            package: package.description.clone(),
            expected: package.checksum.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(DownloadResult {
        package: package.clone(),
        archive_path,
        verified: true,
    })
}

fn wait_for_attempt(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    let deadline = Instant::now() + delay;
    loop {
        cancel.check()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

fn remove_staged(path: &Path) {
    match fs::remove_file(path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
            warn!("could not remove staged file {}: {err}", path.display());
        }
        _ => {}
    }
}

fn network_failure(package: &Package, err: &TransportError, retryable: bool) -> InstallerError {
    InstallerError::NetworkFailure {
        package: package.description.clone(),
        url: package.url.clone(),
        reason: err.to_string(),
        retryable,
    }
}

#[cfg(test)]
#[path = "download_tests.rs"]
mod tests;
