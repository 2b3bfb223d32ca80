//! Per-device run results and device metadata.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::exception::ExceptionInfo;
use super::{DeviceTest, DeviceTestResult, ModelError, ModelResult, TestResultMap, test_map};

/// Metadata describing one device in the fleet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    pub model: String,
    pub manufacturer: String,
    /// OS version string, e.g. `14`.
    pub version: String,
    pub api_level: u32,
    pub locale: String,
}

/// Outcome of the whole run on one device.
///
/// Either installation failed (terminal, no test results possible) or the
/// device carries a map from test identity to result, plus any top-level
/// exceptions not attributable to a single test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResult {
    pub install_failed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_message: Option<String>,

    #[serde(with = "test_map")]
    pub test_results: TestResultMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<DeviceDetails>,

    pub started_at: DateTime<Utc>,

    pub duration: Duration,

    /// Failures not attributable to a single test: run-level instrumentation
    /// failures, harvest failures, worker crashes.
    #[serde(default)]
    pub exceptions: Vec<ExceptionInfo>,
}

impl DeviceResult {
    /// A result synthesized for a device whose worker never produced one
    /// (crash, missing hand-off document). Counts as "the run never got
    /// going": zero tests plus a top-level exception.
    pub fn from_exception(exception: ExceptionInfo) -> Self {
        Self {
            install_failed: false,
            install_message: None,
            test_results: TestResultMap::new(),
            details: None,
            started_at: Utc::now(),
            duration: Duration::ZERO,
            exceptions: vec![exception],
        }
    }
}

/// Builder for [`DeviceResult`].
///
/// `start_tests` must precede `add_test_result`; once
/// `mark_install_as_failed` is called no tests may be added; duplicate
/// test identities are rejected.
#[derive(Debug)]
pub struct DeviceResultBuilder {
    install_failed: bool,
    install_message: Option<String>,
    test_results: TestResultMap,
    details: Option<DeviceDetails>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    started_instant: Option<Instant>,
    duration: Option<Duration>,
    exceptions: Vec<ExceptionInfo>,
}

impl DeviceResultBuilder {
    pub fn new() -> Self {
        Self {
            install_failed: false,
            install_message: None,
            test_results: TestResultMap::new(),
            details: None,
            created_at: Utc::now(),
            started_at: None,
            started_instant: None,
            duration: None,
            exceptions: Vec::new(),
        }
    }

    /// Record device metadata. Legal at any point before `build`.
    pub fn details(&mut self, details: DeviceDetails) -> &mut Self {
        self.details = Some(details);
        self
    }

    /// Record a top-level exception. Legal at any point before `build`.
    pub fn add_exception(&mut self, exception: ExceptionInfo) -> &mut Self {
        self.exceptions.push(exception);
        self
    }

    /// Mark installation as failed. Terminal: no tests may start afterward,
    /// and marking twice is a lifecycle violation.
    pub fn mark_install_as_failed(&mut self, message: impl Into<String>) -> ModelResult<()> {
        if self.install_failed {
            return Err(ModelError::InstallAlreadyFailed {
                op: "mark_install_as_failed",
            });
        }
        if self.started_at.is_some() {
            return Err(ModelError::AlreadyStarted);
        }
        self.install_failed = true;
        self.install_message = Some(message.into());
        Ok(())
    }

    /// Begin the test phase. Rejected after an install failure.
    pub fn start_tests(&mut self) -> ModelResult<()> {
        if self.install_failed {
            return Err(ModelError::InstallAlreadyFailed { op: "start_tests" });
        }
        if self.started_at.is_some() {
            return Err(ModelError::AlreadyStarted);
        }
        self.started_at = Some(Utc::now());
        self.started_instant = Some(Instant::now());
        Ok(())
    }

    /// Record one test's result. Requires `start_tests`; duplicate test
    /// identities are rejected, not overwritten.
    pub fn add_test_result(&mut self, test: DeviceTest, result: DeviceTestResult) -> ModelResult<()> {
        if self.install_failed {
            return Err(ModelError::InstallFailed);
        }
        if self.started_at.is_none() {
            return Err(ModelError::NotStarted { op: "add_test_result" });
        }
        if self.duration.is_some() {
            return Err(ModelError::AlreadyEnded { op: "add_test_result" });
        }
        if self.test_results.contains_key(&test) {
            return Err(ModelError::DuplicateTest(test.id()));
        }
        self.test_results.insert(test, result);
        Ok(())
    }

    /// End the test phase, fixing the device duration.
    pub fn end_tests(&mut self) -> ModelResult<()> {
        let Some(started_instant) = self.started_instant else {
            return Err(ModelError::NotStarted { op: "end_tests" });
        };
        if self.duration.is_some() {
            return Err(ModelError::AlreadyEnded { op: "end_tests" });
        }
        self.duration = Some(started_instant.elapsed());
        Ok(())
    }

    /// Freeze the result.
    ///
    /// After an install failure no test phase exists, so `build` succeeds
    /// immediately. A started test phase must have been ended. A builder
    /// that never started (e.g. only top-level exceptions were recorded)
    /// builds into an empty result.
    pub fn build(self) -> ModelResult<DeviceResult> {
        if self.started_at.is_some() && self.duration.is_none() {
            return Err(ModelError::NotEnded);
        }
        Ok(DeviceResult {
            install_failed: self.install_failed,
            install_message: self.install_message,
            test_results: self.test_results,
            details: self.details,
            started_at: self.started_at.unwrap_or(self.created_at),
            duration: self.duration.unwrap_or(Duration::ZERO),
            exceptions: self.exceptions,
        })
    }
}

impl Default for DeviceResultBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceTestResultBuilder;

    fn pass_result() -> DeviceTestResult {
        let mut builder = DeviceTestResultBuilder::new();
        builder.start_test().unwrap();
        builder.end_test().unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_install_failed_forbids_tests() {
        let mut builder = DeviceResultBuilder::new();
        builder.mark_install_as_failed("INSTALL_FAILED_INSUFFICIENT_STORAGE").unwrap();

        assert_eq!(
            builder.start_tests(),
            Err(ModelError::InstallAlreadyFailed { op: "start_tests" })
        );
        assert_eq!(
            builder.add_test_result(DeviceTest::new("a.B", "c"), pass_result()),
            Err(ModelError::InstallFailed)
        );

        let result = builder.build().unwrap();
        assert!(result.install_failed);
        assert!(result.test_results.is_empty());
        assert_eq!(
            result.install_message.as_deref(),
            Some("INSTALL_FAILED_INSUFFICIENT_STORAGE")
        );
    }

    #[test]
    fn test_add_requires_start() {
        let mut builder = DeviceResultBuilder::new();
        assert_eq!(
            builder.add_test_result(DeviceTest::new("a.B", "c"), pass_result()),
            Err(ModelError::NotStarted { op: "add_test_result" })
        );
    }

    #[test]
    fn test_duplicate_test_rejected() {
        let mut builder = DeviceResultBuilder::new();
        builder.start_tests().unwrap();
        let test = DeviceTest::new("com.example.FooTest", "testBar");
        builder.add_test_result(test.clone(), pass_result()).unwrap();

        assert_eq!(
            builder.add_test_result(test.clone(), pass_result()),
            Err(ModelError::DuplicateTest(test.id()))
        );
    }

    #[test]
    fn test_started_build_requires_end() {
        let mut builder = DeviceResultBuilder::new();
        builder.start_tests().unwrap();
        assert_eq!(builder.build().err(), Some(ModelError::NotEnded));
    }

    #[test]
    fn test_full_lifecycle() {
        let mut builder = DeviceResultBuilder::new();
        builder.details(DeviceDetails {
            model: "Pixel 8".to_string(),
            manufacturer: "Google".to_string(),
            version: "14".to_string(),
            api_level: 34,
            locale: "en-US".to_string(),
        });
        builder.start_tests().unwrap();
        builder
            .add_test_result(DeviceTest::new("a.B", "c"), pass_result())
            .unwrap();
        builder.end_tests().unwrap();

        let result = builder.build().unwrap();
        assert!(!result.install_failed);
        assert_eq!(result.test_results.len(), 1);
        assert_eq!(result.details.as_ref().unwrap().api_level, 34);
    }

    #[test]
    fn test_exception_only_result() {
        let mut builder = DeviceResultBuilder::new();
        builder.add_exception(ExceptionInfo::new("WorkerCrashed", "panic in worker"));
        let result = builder.build().unwrap();
        assert_eq!(result.exceptions.len(), 1);
        assert!(result.test_results.is_empty());
        assert_eq!(result.duration, Duration::ZERO);
    }
}
