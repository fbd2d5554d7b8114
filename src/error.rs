//! Error types for telemetry acquisition and navigation.
//!
//! All errors implement the `std::error::Error` trait and carry structured
//! context (process name, module, offending address) so a bad pointer spec
//! can be diagnosed from the log alone, without re-running.
//!
//! ## Error Categories
//!
//! - **Attachment Errors**: target process missing or not openable
//! - **Enumeration Errors**: module table could not be populated
//! - **Read Errors**: a scalar read returned the wrong byte count
//! - **Sample Errors**: a tick produced a non-finite or implausible value
//! - **Source Errors**: a pose was requested before any sample existed
//! - **Windows API Errors**: platform-specific operation failures
//!
//! ## Recovery and Retry
//!
//! The poller's state machine decides what to do with a failure, but errors
//! classify themselves so callers outside the poller can apply the same
//! policy:
//!
//! ```rust
//! use helmsman::TelemetryError;
//!
//! let error = TelemetryError::process_not_found("Wow.exe");
//! if error.is_retryable() {
//!     // pause and try the attachment again
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

#[cfg(windows)]
use windows_core as core;

/// Result type alias for telemetry and navigation operations.
pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;

/// Main error type for telemetry acquisition and navigation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TelemetryError {
    /// No running process matched the configured name.
    #[error("process '{name}' not found")]
    ProcessNotFound { name: String },

    /// The OS denied opening a handle to the target process.
    #[error("cannot open process {pid}")]
    ProcessNotAccessible {
        pid: u32,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Module enumeration reported an inconsistent buffer size twice in a row.
    #[error("module enumeration failed: needed {needed} bytes, buffer held {capacity}")]
    EnumerationFailed { needed: usize, capacity: usize },

    /// The anchor module is absent from the attached process.
    #[error("module '{module}' not found in target process")]
    ModuleNotFound { module: String },

    /// A scalar read did not return the exact requested byte count.
    #[error("read of {expected} bytes at {address:#x} returned {got}")]
    ReadOutOfRange { address: u64, expected: usize, got: usize },

    /// A tick produced a value the coherence filter rejected.
    #[error("incoherent sample: {reason}")]
    IncoherentSample { reason: String },

    /// A pose was requested before the active source ever published.
    ///
    /// The field is the source's name, not an error cause; `source` itself is
    /// reserved by the derive for error chaining.
    #[error("{source_name} source has not produced a sample yet")]
    SourceNotReady { source_name: &'static str },

    /// The watchdog observed no heartbeat for longer than its timeout.
    #[error("telemetry stale for {elapsed:?}")]
    StaleTelemetry { elapsed: Duration },

    /// A waypoint path had fewer than two entries.
    #[error("path must contain at least 2 waypoints, got {count}")]
    PathTooShort { count: usize },

    /// Configuration was invalid or could not be parsed.
    #[error("configuration error: {reason}")]
    Config {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{feature} is only available on {required_platform}")]
    UnsupportedPlatform { feature: String, required_platform: String },

    #[error("Windows API error: {operation}")]
    #[cfg(windows)]
    WindowsApi {
        operation: String,
        #[source]
        source: core::Error,
    },
}

impl TelemetryError {
    /// Returns whether this error is potentially recoverable through retry.
    ///
    /// Retryable errors are the ones the poller absorbs: it re-attaches after
    /// attachment-level failures and skips the tick on per-tick failures.
    /// Non-retryable errors must surface to the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            TelemetryError::ProcessNotFound { .. } => true,
            TelemetryError::ProcessNotAccessible { .. } => true,
            TelemetryError::EnumerationFailed { .. } => true,
            TelemetryError::ModuleNotFound { .. } => true,
            TelemetryError::ReadOutOfRange { .. } => true,
            TelemetryError::IncoherentSample { .. } => true,
            TelemetryError::SourceNotReady { .. } => false,
            TelemetryError::StaleTelemetry { .. } => false,
            TelemetryError::PathTooShort { .. } => false,
            TelemetryError::Config { .. } => false,
            TelemetryError::UnsupportedPlatform { .. } => false,
            #[cfg(windows)]
            TelemetryError::WindowsApi { .. } => true,
        }
    }

    /// Returns whether this error aborts only the current sampling tick.
    ///
    /// Tick-level failures leave the previously published sample authoritative;
    /// everything else retryable forces a detach/re-attach cycle.
    pub fn is_tick_level(&self) -> bool {
        matches!(
            self,
            TelemetryError::ReadOutOfRange { .. } | TelemetryError::IncoherentSample { .. }
        )
    }

    /// Helper constructor for a missing target process.
    pub fn process_not_found(name: impl Into<String>) -> Self {
        TelemetryError::ProcessNotFound { name: name.into() }
    }

    /// Helper constructor for an unopenable process.
    pub fn process_not_accessible(pid: u32) -> Self {
        TelemetryError::ProcessNotAccessible { pid, source: None }
    }

    /// Helper constructor for a missing anchor module.
    pub fn module_not_found(module: impl Into<String>) -> Self {
        TelemetryError::ModuleNotFound { module: module.into() }
    }

    /// Helper constructor for a short read.
    pub fn read_out_of_range(address: u64, expected: usize, got: usize) -> Self {
        TelemetryError::ReadOutOfRange { address, expected, got }
    }

    /// Helper constructor for a rejected sample.
    pub fn incoherent_sample(reason: impl Into<String>) -> Self {
        TelemetryError::IncoherentSample { reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(reason: impl Into<String>) -> Self {
        TelemetryError::Config { reason: reason.into(), source: None }
    }

    /// Helper constructor for configuration errors with a source.
    pub fn config_error_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        TelemetryError::Config { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for unsupported platform errors.
    pub fn unsupported_platform(
        feature: impl Into<String>,
        required_platform: impl Into<String>,
    ) -> Self {
        TelemetryError::UnsupportedPlatform {
            feature: feature.into(),
            required_platform: required_platform.into(),
        }
    }

    /// Helper constructor for Windows API errors.
    #[cfg(windows)]
    pub fn windows_api_error(operation: impl Into<String>, source: core::Error) -> Self {
        TelemetryError::WindowsApi { operation: operation.into(), source }
    }
}

impl From<std::io::Error> for TelemetryError {
    fn from(err: std::io::Error) -> Self {
        TelemetryError::Config { reason: "I/O failure".to_string(), source: Some(Box::new(err)) }
    }
}
