//! Device transport contract and implementations.
//!
//! The core never talks to a device transport directly. Everything goes
//! through the [`DeviceBackend`] trait, which makes the executor and
//! orchestrator testable against a scripted double and keeps the adb
//! plumbing in one place.

pub mod adb;
pub mod protocol;

#[cfg(test)]
pub(crate) mod fake;

use std::path::Path;

use async_trait::async_trait;

use crate::model::{DeviceDetails, DeviceTest};

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur while driving a device.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to install {artifact}: {message}")]
    InstallFailed { artifact: String, message: String },

    #[error("instrumentation run failed: {0}")]
    RunFailed(String),

    #[error("failed to pull {remote}: {message}")]
    PullFailed { remote: String, message: String },

    #[error("transport command failed with exit code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    #[error("transport command timed out after {0}s")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Distinguishes an assertion failure from an infrastructure error in a
/// `test_failed` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The test ran and its assertions failed.
    Failure,
    /// The test could not run to completion (crash, setup failure).
    Error,
}

/// Receiver for instrumentation run events on one device.
///
/// Per device the ordering is `test_started`, zero or more intermediate
/// events, `test_ended`, for each test in turn; ordering across devices
/// is unspecified. `test_run_failed` reports a run-level failure not
/// attributable to a single test and may arrive at any point.
pub trait RunListener: Send {
    fn test_started(&mut self, test: &DeviceTest);
    fn test_failed(&mut self, test: &DeviceTest, kind: FailureKind, trace: &str);
    fn test_ignored(&mut self, test: &DeviceTest);
    fn test_assumption_failure(&mut self, test: &DeviceTest, trace: &str);
    fn test_ended(&mut self, test: &DeviceTest);
    fn test_run_failed(&mut self, message: &str);
}

/// A device transport: installs artifacts, runs instrumentation, pulls
/// files, and executes shell commands against devices addressed by serial.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// List the serials of all connected, usable devices.
    async fn list_devices(&self) -> BackendResult<Vec<String>>;

    /// Query model, manufacturer, OS version, API level, and locale.
    async fn device_details(&self, serial: &str) -> BackendResult<DeviceDetails>;

    /// Install an artifact, replacing any existing installation.
    async fn install_package(&self, serial: &str, artifact: &Path) -> BackendResult<()>;

    /// Run the instrumentation suite, streaming events into `listener`.
    ///
    /// Returns `Ok` when the instrumentation process completed, whether or
    /// not individual tests passed; `Err` when the run itself could not be
    /// executed.
    async fn run_instrumentation(
        &self,
        serial: &str,
        test_package: &str,
        runner_class: &str,
        args: &[(String, String)],
        listener: &mut dyn RunListener,
    ) -> BackendResult<()>;

    /// Recursively pull a directory from the device into `local`.
    async fn pull_directory(&self, serial: &str, remote: &str, local: &Path) -> BackendResult<()>;

    /// Run a shell command on the device and return its output.
    async fn shell(&self, serial: &str, command: &str) -> BackendResult<String>;

    /// Backend name, for logging.
    fn name(&self) -> &'static str;
}
