//! Once-per-run telemetry.
//!
//! The [`TelemetryReporter`] is a property bag filled in as the run
//! progresses and emitted exactly once through a [`TelemetrySink`].

use crate::sanitize::sanitize;
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;

/// Property keys recorded by the installation pipeline.
pub mod keys {
    /// Terminal outcome: `success`, `failure`, or `alreadyInstalled`.
    pub const OUTCOME: &str = "outcome";
    /// The last stage reached.
    pub const STAGE: &str = "installStage";
    /// `online` or `offline`.
    pub const INSTALL_TYPE: &str = "installType";
    /// The detected platform, e.g. `linux-x64`.
    pub const PLATFORM: &str = "platform";
    /// The Linux distribution, when known.
    pub const DISTRIBUTION: &str = "distribution";
    /// Number of packages selected for this platform.
    pub const PACKAGE_COUNT: &str = "packageCount";
    /// Number of warnings raised.
    pub const WARNING_COUNT: &str = "warningCount";
    /// Wall-clock run duration in milliseconds.
    pub const DURATION_MS: &str = "durationMs";
    /// Stable error classification of a failure.
    pub const ERROR_KIND: &str = "errorKind";
    /// The stage a failure happened in.
    pub const ERROR_STAGE: &str = "errorStage";
    /// The package a failure is attributed to.
    pub const ERROR_PACKAGE: &str = "errorPackage";
    /// The sanitized failure message.
    pub const ERROR_MESSAGE: &str = "errorMessage";
}

/// A single emitted telemetry event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryEvent {
    /// Event name.
    pub name: String,
    /// Accumulated properties.
    pub properties: BTreeMap<String, String>,
}

impl TelemetryEvent {
    /// Look up one property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Destination for telemetry events.
///
/// Implementations must not block the caller for long and must swallow
/// their own failures.
pub trait TelemetrySink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: &TelemetryEvent);
}

/// Sink that writes events to the log at `info` level as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn emit(&self, event: &TelemetryEvent) {
        match serde_json::to_string(event) {
            Ok(json) => info!(target: "telemetry", "{json}"),
            Err(err) => info!(target: "telemetry", "{}: unserializable event: {err}", event.name),
        }
    }
}

/// Accumulates properties and emits them once.
///
/// # Examples
///
/// ```
/// use runtime_installer::telemetry::{TelemetryEvent, TelemetryReporter, TelemetrySink};
/// use std::sync::Mutex;
///
/// #[derive(Default)]
/// struct Capture(Mutex<Vec<TelemetryEvent>>);
///
/// impl TelemetrySink for Capture {
///     fn emit(&self, event: &TelemetryEvent) {
///         if let Ok(mut events) = self.0.lock() {
///             events.push(event.clone());
///         }
///     }
/// }
///
/// let sink = Capture::default();
/// let mut reporter = TelemetryReporter::new("acquisition");
/// reporter.record("outcome", "success");
/// assert!(reporter.flush(&sink));
/// assert!(!reporter.flush(&sink));
/// assert_eq!(sink.0.lock().map(|e| e.len()).unwrap_or_default(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct TelemetryReporter {
    name: String,
    properties: BTreeMap<String, String>,
    flushed: bool,
}

impl TelemetryReporter {
    /// Create an empty reporter for events called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
            flushed: false,
        }
    }

    /// Set `key` to `value`, replacing any earlier value.
    pub fn record(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Set `key` to a sanitized copy of `message`.
    pub fn record_sanitized(&mut self, key: impl Into<String>, message: &str) {
        self.record(key, sanitize(message));
    }

    /// Properties recorded so far.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Whether the event has been emitted.
    #[must_use]
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Emit the accumulated event once.
    ///
    /// Returns `true` if this call emitted; later calls do nothing and
    /// return `false`.
    pub fn flush(&mut self, sink: &dyn TelemetrySink) -> bool {
        if self.flushed {
            return false;
        }
        self.flushed = true;
        sink.emit(&TelemetryEvent {
            name: self.name.clone(),
            properties: self.properties.clone(),
        });
        true
    }
}
