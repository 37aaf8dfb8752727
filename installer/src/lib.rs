//! Runtime dependency installer library.
//!
//! This crate acquires the platform-specific runtime binaries a host tool
//! needs: it detects the host platform, selects packages from a catalog,
//! downloads and verifies them (or verifies bundled copies offline), places
//! them atomically, marks binaries executable, and rewrites the host
//! manifest. It is used by the `runtime-installer` CLI binary and can be
//! driven programmatically through [`pipeline::InstallationStateMachine`].
//!
//! # Modules
//!
//! - [`artefact`] - Digests, transport, and archive extraction
//! - [`cancel`] - Cooperative cancellation tokens
//! - [`catalog`] - The package catalog and platform selection
//! - [`cli`] - Command-line argument definitions
//! - [`config`] - TOML configuration with defaults
//! - [`dirs`] - Directory resolution abstraction for platform-specific paths
//! - [`download`] - Archive download with retry and verification
//! - [`error`] - Semantic error types with recovery hints
//! - [`install`] - Atomic placement of extracted packages
//! - [`install_metrics`] - Local aggregate run metrics
//! - [`lock`] - The "installed" marker and per-root run guard
//! - [`manifest`] - Host manifest rewriting
//! - [`observer`] - Progress and notification surface
//! - [`output`] - CLI message formatting
//! - [`permissions`] - Execute-bit handling
//! - [`pipeline`] - The installation state machine
//! - [`platform`] - Host platform detection
//! - [`sanitize`] - Scrubbing of paths and secrets from messages
//! - [`stage`] - Pipeline stages and the per-run record
//! - [`telemetry`] - One-shot run telemetry

pub mod artefact;
pub mod cancel;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod dirs;
pub mod download;
pub mod error;
pub mod install;
pub mod install_metrics;
pub mod lock;
pub mod manifest;
pub mod observer;
pub mod output;
pub mod permissions;
pub mod pipeline;
pub mod platform;
pub mod sanitize;
pub mod stage;
pub mod telemetry;

#[cfg(any(test, feature = "test-support"))]
#[allow(
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    reason = "test helpers fail fast when fixture setup fails"
)]
pub mod test_utils;
