//! Scripted backend double for executor and orchestrator tests.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::Path;

use async_trait::async_trait;

use super::{BackendError, BackendResult, DeviceBackend, FailureKind, RunListener};
use crate::model::{DeviceDetails, DeviceTest};

/// One scripted instrumentation event.
#[derive(Debug, Clone)]
pub(crate) enum FakeEvent {
    Started(DeviceTest),
    Failed(DeviceTest, String),
    Errored(DeviceTest, String),
    Ignored(DeviceTest),
    Assumption(DeviceTest, String),
    Ended(DeviceTest),
    RunFailed(String),
}

/// A [`DeviceBackend`] that replays scripted events and materializes
/// scripted screenshot trees on pull.
#[derive(Default)]
pub(crate) struct FakeBackend {
    devices: Vec<String>,
    details: HashMap<String, DeviceDetails>,
    install_failures: HashMap<String, String>,
    events: HashMap<String, Vec<FakeEvent>>,
    run_errors: HashMap<String, String>,
    screenshot_trees: HashMap<String, Vec<(String, Vec<u8>)>>,
    pull_failures: HashSet<String>,
    panics: HashSet<String>,
}

impl FakeBackend {
    pub(crate) fn new<S: Into<String>>(devices: impl IntoIterator<Item = S>) -> Self {
        Self {
            devices: devices.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn with_install_failure(mut self, serial: &str, message: &str) -> Self {
        self.install_failures.insert(serial.to_string(), message.to_string());
        self
    }

    pub(crate) fn with_events(mut self, serial: &str, events: Vec<FakeEvent>) -> Self {
        self.events.insert(serial.to_string(), events);
        self
    }

    pub(crate) fn with_run_error(mut self, serial: &str, message: &str) -> Self {
        self.run_errors.insert(serial.to_string(), message.to_string());
        self
    }

    /// Files (path relative to the remote screenshot root, contents)
    /// that a pull materializes for this serial.
    pub(crate) fn with_screenshots(mut self, serial: &str, files: Vec<(String, Vec<u8>)>) -> Self {
        self.screenshot_trees.insert(serial.to_string(), files);
        self
    }

    pub(crate) fn with_pull_failure(mut self, serial: &str) -> Self {
        self.pull_failures.insert(serial.to_string());
        self
    }

    /// Make this serial's instrumentation run panic, simulating a worker
    /// crash.
    pub(crate) fn with_panic(mut self, serial: &str) -> Self {
        self.panics.insert(serial.to_string());
        self
    }

    /// Events for a conventional run: every given test starts, optionally
    /// fails, and ends.
    pub(crate) fn passing_run(tests: &[DeviceTest]) -> Vec<FakeEvent> {
        tests
            .iter()
            .flat_map(|t| [FakeEvent::Started(t.clone()), FakeEvent::Ended(t.clone())])
            .collect()
    }
}

#[async_trait]
impl DeviceBackend for FakeBackend {
    async fn list_devices(&self) -> BackendResult<Vec<String>> {
        Ok(self.devices.clone())
    }

    async fn device_details(&self, serial: &str) -> BackendResult<DeviceDetails> {
        Ok(self.details.get(serial).cloned().unwrap_or_else(|| DeviceDetails {
            model: format!("fake-{serial}"),
            manufacturer: "FleetTest".to_string(),
            version: "14".to_string(),
            api_level: 34,
            locale: "en-US".to_string(),
        }))
    }

    async fn install_package(&self, serial: &str, artifact: &Path) -> BackendResult<()> {
        if let Some(message) = self.install_failures.get(serial) {
            return Err(BackendError::InstallFailed {
                artifact: artifact.display().to_string(),
                message: message.clone(),
            });
        }
        Ok(())
    }

    async fn run_instrumentation(
        &self,
        serial: &str,
        _test_package: &str,
        _runner_class: &str,
        _args: &[(String, String)],
        listener: &mut dyn RunListener,
    ) -> BackendResult<()> {
        if self.panics.contains(serial) {
            panic!("fake backend crash on {serial}");
        }
        if let Some(message) = self.run_errors.get(serial) {
            return Err(BackendError::RunFailed(message.clone()));
        }
        for event in self.events.get(serial).into_iter().flatten() {
            match event {
                FakeEvent::Started(test) => listener.test_started(test),
                FakeEvent::Failed(test, trace) => {
                    listener.test_failed(test, FailureKind::Failure, trace)
                }
                FakeEvent::Errored(test, trace) => {
                    listener.test_failed(test, FailureKind::Error, trace)
                }
                FakeEvent::Ignored(test) => listener.test_ignored(test),
                FakeEvent::Assumption(test, trace) => {
                    listener.test_assumption_failure(test, trace)
                }
                FakeEvent::Ended(test) => listener.test_ended(test),
                FakeEvent::RunFailed(message) => listener.test_run_failed(message),
            }
        }
        Ok(())
    }

    async fn pull_directory(&self, serial: &str, remote: &str, local: &Path) -> BackendResult<()> {
        if self.pull_failures.contains(serial) {
            return Err(BackendError::PullFailed {
                remote: remote.to_string(),
                message: "remote object does not exist".to_string(),
            });
        }
        for (relative, contents) in self.screenshot_trees.get(serial).into_iter().flatten() {
            let path = local.join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents)?;
        }
        Ok(())
    }

    async fn shell(&self, _serial: &str, _command: &str) -> BackendResult<String> {
        Ok(String::new())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// A tiny valid PNG for screenshot fixtures.
pub(crate) fn tiny_png() -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("in-memory png encode");
    bytes
}
