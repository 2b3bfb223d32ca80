//! The immutable result model.
//!
//! Entities are produced by lifecycle-enforcing builders: data may not be
//! added before `start`, nothing may be added after a terminal call, and
//! duplicate identities are rejected rather than overwritten. `build()`
//! consumes the builder and freezes the entity. The same pattern applies
//! at all three levels: test, device, and fleet.

pub mod device;
pub mod exception;
pub mod summary;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};

pub use device::{DeviceDetails, DeviceResult, DeviceResultBuilder};
pub use exception::ExceptionInfo;
pub use summary::{FleetSummary, FleetSummaryBuilder, TestCounts};

/// Result type for model builder operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Lifecycle violations raised by the result-model builders.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("`{op}` called before `start`")]
    NotStarted { op: &'static str },

    #[error("`start` called twice")]
    AlreadyStarted,

    #[error("`{op}` called after `end`")]
    AlreadyEnded { op: &'static str },

    #[error("`build` called before `end`")]
    NotEnded,

    #[error("terminal status set twice")]
    StatusAlreadySet,

    #[error("duplicate result for test `{0}`")]
    DuplicateTest(String),

    #[error("duplicate result for device serial `{0}`")]
    DuplicateSerial(String),

    #[error("test results cannot be added after install failure")]
    InstallFailed,

    #[error("`{op}` called after install failure")]
    InstallAlreadyFailed { op: &'static str },
}

/// Identity of one test case: class plus method.
///
/// Ordered lexicographically by `(class_name, method_name)` and usable as
/// a map key; equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTest {
    pub class_name: String,
    pub method_name: String,
}

impl DeviceTest {
    /// Create a test identity from a class name and method name.
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
        }
    }

    /// Parse a `com.example.FooTest#testBar` identifier.
    pub fn from_id(id: &str) -> Self {
        match id.split_once('#') {
            Some((class, method)) => Self::new(class, method),
            None => Self::new(id, ""),
        }
    }

    /// The `com.example.FooTest#testBar` form, used as the document map key.
    pub fn id(&self) -> String {
        format!("{}#{}", self.class_name, self.method_name)
    }
}

impl fmt::Display for DeviceTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class_name, self.method_name)
    }
}

/// Outcome status of one test on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Pass,
    Fail,
    Error,
    Ignored,
    AssumptionFailure,
}

impl TestStatus {
    /// Whether this status counts toward overall fleet success.
    pub fn is_pass(self) -> bool {
        self == TestStatus::Pass
    }
}

/// Outcome of one test on one device: status, optional structured
/// exception, duration, and harvested artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTestResult {
    pub status: TestStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,

    /// Wall-clock duration in whole seconds, derived from a monotonic clock.
    pub duration_secs: u64,

    /// Screenshot files in capture order.
    #[serde(default)]
    pub screenshots: Vec<PathBuf>,

    /// Animated GIF synthesized when a test produced more than one screenshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animated_gif: Option<PathBuf>,

    /// Device-log excerpt captured for failing tests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

/// Builder for [`DeviceTestResult`].
///
/// Must see `start_test` before any other call and `end_test` before
/// `build`. The status starts as `Pass` and may transition away exactly
/// once; a second terminal transition is a lifecycle violation.
#[derive(Debug)]
pub struct DeviceTestResultBuilder {
    status: TestStatus,
    status_is_terminal: bool,
    exception: Option<ExceptionInfo>,
    started_at: Option<Instant>,
    duration_secs: Option<u64>,
    screenshots: Vec<PathBuf>,
    animated_gif: Option<PathBuf>,
    log: Option<String>,
}

impl DeviceTestResultBuilder {
    pub fn new() -> Self {
        Self {
            status: TestStatus::Pass,
            status_is_terminal: false,
            exception: None,
            started_at: None,
            duration_secs: None,
            screenshots: Vec::new(),
            animated_gif: None,
            log: None,
        }
    }

    /// Begin timing the test. Must be the first lifecycle call.
    pub fn start_test(&mut self) -> ModelResult<()> {
        if self.started_at.is_some() {
            return Err(ModelError::AlreadyStarted);
        }
        self.started_at = Some(Instant::now());
        Ok(())
    }

    pub fn has_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn has_ended(&self) -> bool {
        self.duration_secs.is_some()
    }

    /// Mark the test failed with the raw stack-trace text.
    pub fn mark_test_as_failed(&mut self, trace: &str) -> ModelResult<()> {
        self.terminal(TestStatus::Fail, "mark_test_as_failed")?;
        self.exception = Some(ExceptionInfo::from_trace(trace));
        self.log = Some(trace.to_string());
        Ok(())
    }

    /// Mark the test errored (infrastructure failure, not an assertion).
    pub fn mark_test_as_errored(&mut self, trace: &str) -> ModelResult<()> {
        self.terminal(TestStatus::Error, "mark_test_as_errored")?;
        self.exception = Some(ExceptionInfo::from_trace(trace));
        self.log = Some(trace.to_string());
        Ok(())
    }

    /// Mark the test ignored.
    pub fn mark_test_as_ignored(&mut self) -> ModelResult<()> {
        self.terminal(TestStatus::Ignored, "mark_test_as_ignored")
    }

    /// Mark the test as a failed assumption.
    pub fn mark_test_as_assumption_failure(&mut self, trace: &str) -> ModelResult<()> {
        self.terminal(TestStatus::AssumptionFailure, "mark_test_as_assumption_failure")?;
        self.exception = Some(ExceptionInfo::from_trace(trace));
        Ok(())
    }

    /// Stop timing the test. Requires `start_test`; may be called once.
    pub fn end_test(&mut self) -> ModelResult<()> {
        let Some(started_at) = self.started_at else {
            return Err(ModelError::NotStarted { op: "end_test" });
        };
        if self.duration_secs.is_some() {
            return Err(ModelError::AlreadyEnded { op: "end_test" });
        }
        self.duration_secs = Some(started_at.elapsed().as_secs());
        Ok(())
    }

    /// Attach a harvested screenshot. Harvest runs after the instrumentation
    /// run, so this is legal after `end_test` but never before `start_test`.
    pub fn add_screenshot(&mut self, path: PathBuf) -> ModelResult<()> {
        if self.started_at.is_none() {
            return Err(ModelError::NotStarted { op: "add_screenshot" });
        }
        self.screenshots.push(path);
        Ok(())
    }

    /// Attach the synthesized animated GIF.
    pub fn set_animated_gif(&mut self, path: PathBuf) -> ModelResult<()> {
        if self.started_at.is_none() {
            return Err(ModelError::NotStarted { op: "set_animated_gif" });
        }
        self.animated_gif = Some(path);
        Ok(())
    }

    /// Attach a device-log excerpt.
    pub fn set_log(&mut self, excerpt: impl Into<String>) -> ModelResult<()> {
        if self.started_at.is_none() {
            return Err(ModelError::NotStarted { op: "set_log" });
        }
        self.log = Some(excerpt.into());
        Ok(())
    }

    /// Freeze the result. Requires both `start_test` and `end_test`.
    pub fn build(self) -> ModelResult<DeviceTestResult> {
        if self.started_at.is_none() {
            return Err(ModelError::NotStarted { op: "build" });
        }
        let Some(duration_secs) = self.duration_secs else {
            return Err(ModelError::NotEnded);
        };
        Ok(DeviceTestResult {
            status: self.status,
            exception: self.exception,
            duration_secs,
            screenshots: self.screenshots,
            animated_gif: self.animated_gif,
            log: self.log,
        })
    }

    fn terminal(&mut self, status: TestStatus, op: &'static str) -> ModelResult<()> {
        if self.started_at.is_none() {
            return Err(ModelError::NotStarted { op });
        }
        if self.status_is_terminal {
            return Err(ModelError::StatusAlreadySet);
        }
        self.status = status;
        self.status_is_terminal = true;
        Ok(())
    }
}

impl Default for DeviceTestResultBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Serde adapter for maps keyed by [`DeviceTest`].
///
/// JSON object keys must be strings, so test-keyed maps serialize with the
/// `class#method` identifier as the key.
pub(crate) mod test_map {
    use std::collections::BTreeMap;

    use serde::de::{Deserialize, Deserializer};
    use serde::ser::{Serialize, Serializer};

    use super::DeviceTest;

    pub fn serialize<V, S>(map: &BTreeMap<DeviceTest, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        V: Serialize,
        S: Serializer,
    {
        let keyed: BTreeMap<String, &V> = map.iter().map(|(k, v)| (k.id(), v)).collect();
        keyed.serialize(serializer)
    }

    pub fn deserialize<'de, V, D>(deserializer: D) -> Result<BTreeMap<DeviceTest, V>, D::Error>
    where
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let keyed = BTreeMap::<String, V>::deserialize(deserializer)?;
        Ok(keyed
            .into_iter()
            .map(|(k, v)| (DeviceTest::from_id(&k), v))
            .collect())
    }
}

/// Map from test identity to its result on one device.
pub type TestResultMap = BTreeMap<DeviceTest, DeviceTestResult>;
