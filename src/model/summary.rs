//! The fleet-level summary: the full-run output and unit of persistence.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeviceResult, ModelError, ModelResult, TestStatus};

/// The full-run output: one [`DeviceResult`] per device serial, plus run
/// identity and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Device results keyed by serial.
    pub results: BTreeMap<String, DeviceResult>,
}

/// Aggregate test counts across the fleet, for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub ignored: usize,
    pub assumption_failures: usize,
}

impl FleetSummary {
    /// When the run ended: start plus duration.
    pub fn ended_at(&self) -> DateTime<Utc> {
        self.started_at + chrono::Duration::from_std(self.duration).unwrap_or_default()
    }

    /// Overall pass/fail verdict for the run.
    ///
    /// False iff any device has an install failure, OR has at least one
    /// top-level exception and zero test results (the run never got going),
    /// OR has any individual test whose status is not `PASS`. A device that
    /// ran zero tests with no exceptions counts as success.
    pub fn is_success(&self) -> bool {
        for result in self.results.values() {
            if result.install_failed {
                return false;
            }
            if !result.exceptions.is_empty() && result.test_results.is_empty() {
                return false;
            }
            if result.test_results.values().any(|r| !r.status.is_pass()) {
                return false;
            }
        }
        true
    }

    /// Aggregate test counts across all devices.
    pub fn test_counts(&self) -> TestCounts {
        let mut counts = TestCounts::default();
        for result in self.results.values() {
            for test_result in result.test_results.values() {
                counts.total += 1;
                match test_result.status {
                    TestStatus::Pass => counts.passed += 1,
                    TestStatus::Fail => counts.failed += 1,
                    TestStatus::Error => counts.errored += 1,
                    TestStatus::Ignored => counts.ignored += 1,
                    TestStatus::AssumptionFailure => counts.assumption_failures += 1,
                }
            }
        }
        counts
    }
}

/// Builder for [`FleetSummary`].
///
/// Results may only be added between `start` and `end`, and each serial
/// at most once.
#[derive(Debug)]
pub struct FleetSummaryBuilder {
    title: String,
    started_at: Option<DateTime<Utc>>,
    started_instant: Option<Instant>,
    duration: Option<Duration>,
    results: BTreeMap<String, DeviceResult>,
}

impl FleetSummaryBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            started_at: None,
            started_instant: None,
            duration: None,
            results: BTreeMap::new(),
        }
    }

    /// Begin the run.
    pub fn start(&mut self) -> ModelResult<()> {
        if self.started_at.is_some() {
            return Err(ModelError::AlreadyStarted);
        }
        self.started_at = Some(Utc::now());
        self.started_instant = Some(Instant::now());
        Ok(())
    }

    /// Record one device's result. Each serial may be added at most once.
    pub fn add_result(&mut self, serial: impl Into<String>, result: DeviceResult) -> ModelResult<()> {
        if self.started_at.is_none() {
            return Err(ModelError::NotStarted { op: "add_result" });
        }
        if self.duration.is_some() {
            return Err(ModelError::AlreadyEnded { op: "add_result" });
        }
        let serial = serial.into();
        if self.results.contains_key(&serial) {
            return Err(ModelError::DuplicateSerial(serial));
        }
        self.results.insert(serial, result);
        Ok(())
    }

    /// End the run, fixing its duration.
    pub fn end(&mut self) -> ModelResult<()> {
        let Some(started_instant) = self.started_instant else {
            return Err(ModelError::NotStarted { op: "end" });
        };
        if self.duration.is_some() {
            return Err(ModelError::AlreadyEnded { op: "end" });
        }
        self.duration = Some(started_instant.elapsed());
        Ok(())
    }

    /// Freeze the summary. Requires `start` and `end`.
    pub fn build(self) -> ModelResult<FleetSummary> {
        let Some(started_at) = self.started_at else {
            return Err(ModelError::NotStarted { op: "build" });
        };
        let Some(duration) = self.duration else {
            return Err(ModelError::NotEnded);
        };
        Ok(FleetSummary {
            title: self.title,
            started_at,
            duration,
            results: self.results,
        })
    }
}
