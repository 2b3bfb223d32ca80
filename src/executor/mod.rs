//! Per-device execution engine.
//!
//! One executor runs one device's full cycle: resolve metadata, install
//! both artifacts, run the instrumentation suite, harvest evidence, and
//! produce a [`DeviceResult`]. Everything past a successful installation
//! is converted into data on that result; nothing propagates out of a
//! device's own execution, so one device's failure can never abort the
//! fleet.

pub mod harvest;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{DeviceBackend, FailureKind, RunListener};
use crate::manifest::InstrumentationInfo;
use crate::model::{
    DeviceResult, DeviceResultBuilder, DeviceTest, DeviceTestResultBuilder, ExceptionInfo,
    ModelResult,
};
use crate::report::Reporter;

/// Everything a worker needs to run one device.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub serial: String,
    /// Application artifact to install first.
    pub application: PathBuf,
    /// Instrumentation artifact to install second.
    pub instrumentation: PathBuf,
    /// Metadata extracted from the instrumentation artifact's manifest.
    pub info: InstrumentationInfo,
    /// Private output directory for this serial.
    pub output_dir: PathBuf,
    /// Extra `-e key value` arguments for the instrumentation runner.
    pub instrumentation_args: Vec<(String, String)>,
}

/// Runs one device's install → run → harvest cycle.
pub struct DeviceExecutor<B: ?Sized> {
    backend: Arc<B>,
    reporter: Arc<dyn Reporter>,
}

impl<B: DeviceBackend + ?Sized> DeviceExecutor<B> {
    pub fn new(backend: Arc<B>, reporter: Arc<dyn Reporter>) -> Self {
        Self { backend, reporter }
    }

    /// Execute the plan. Infallible by contract: failures become data on
    /// the returned [`DeviceResult`].
    pub async fn execute(&self, plan: &ExecutionPlan) -> DeviceResult {
        self.reporter.on_device_start(&plan.serial).await;
        let result = match self.run_device(plan).await {
            Ok(result) => result,
            // Builder lifecycle errors cannot occur in the sequence below;
            // if one does, surface it as the device's failure.
            Err(err) => DeviceResult::from_exception(ExceptionInfo::new(
                "ExecutorFailure",
                err.to_string(),
            )),
        };
        self.reporter.on_device_complete(&plan.serial, &result).await;
        result
    }

    async fn run_device(&self, plan: &ExecutionPlan) -> ModelResult<DeviceResult> {
        let serial = &plan.serial;
        let mut device = DeviceResultBuilder::new();

        match self.backend.device_details(serial).await {
            Ok(details) => {
                debug!("{serial}: {} {} (API {})", details.manufacturer, details.model, details.api_level);
                device.details(details);
            }
            Err(err) => {
                warn!("{serial}: failed to read device metadata: {err}");
                device.add_exception(ExceptionInfo::new("DeviceMetadataFailure", err.to_string()));
            }
        }

        for artifact in [&plan.application, &plan.instrumentation] {
            if let Err(err) = self.backend.install_package(serial, artifact).await {
                info!("{serial}: {err}");
                device.mark_install_as_failed(err.to_string())?;
                return device.build();
            }
        }

        device.start_tests()?;

        let mut listener = ResultListener::new(serial.clone());
        info!(
            "{serial}: running {}/{}",
            plan.info.instrumentation_package, plan.info.test_runner_class
        );
        if let Err(err) = self
            .backend
            .run_instrumentation(
                serial,
                &plan.info.instrumentation_package,
                &plan.info.test_runner_class,
                &plan.instrumentation_args,
                &mut listener,
            )
            .await
        {
            warn!("{serial}: instrumentation run failed: {err}");
            device.add_exception(ExceptionInfo::new("InstrumentationFailure", err.to_string()));
        }

        // Best-effort harvest, before per-test results are frozen so
        // artifacts can still be attached.
        if let Err(err) = harvest::harvest_screenshots(
            self.backend.as_ref(),
            serial,
            &plan.output_dir,
            &mut listener.builders,
        )
        .await
        {
            warn!("{serial}: harvest failed: {err}");
            device.add_exception(ExceptionInfo::new("HarvestFailure", err.to_string()));
        }

        for message in &listener.run_failures {
            device.add_exception(ExceptionInfo::new("InstrumentationRunFailed", message.clone()));
        }

        for (test, mut builder) in listener.builders {
            if !builder.has_ended()
                && let Err(err) = builder.end_test()
            {
                warn!("{serial}: could not close out {test}: {err}");
            }
            match builder.build() {
                Ok(result) => device.add_test_result(test, result)?,
                Err(err) => {
                    device.add_exception(ExceptionInfo::new(
                        "ResultAssemblyFailure",
                        format!("{test}: {err}"),
                    ));
                }
            }
        }

        device.end_tests()?;
        device.build()
    }
}

/// Converts backend run callbacks into result-builder calls, keyed by
/// test identity.
struct ResultListener {
    serial: String,
    builders: BTreeMap<DeviceTest, DeviceTestResultBuilder>,
    run_failures: Vec<String>,
}

impl ResultListener {
    fn new(serial: String) -> Self {
        Self {
            serial,
            builders: BTreeMap::new(),
            run_failures: Vec::new(),
        }
    }

    /// Get the builder for a test, synthesizing a started one for an
    /// identity the backend never announced. A callback for an unseen
    /// test is a backend anomaly, tolerated rather than fatal.
    fn builder(&mut self, test: &DeviceTest) -> &mut DeviceTestResultBuilder {
        self.builders.entry(test.clone()).or_insert_with(|| {
            debug!("{}: callback for unannounced test {test}", self.serial);
            let mut builder = DeviceTestResultBuilder::new();
            // A fresh builder always accepts start.
            let _ = builder.start_test();
            builder
        })
    }
}

impl RunListener for ResultListener {
    fn test_started(&mut self, test: &DeviceTest) {
        if let Some(existing) = self.builders.get(test) {
            if existing.has_started() {
                warn!("{}: duplicate start for {test}", self.serial);
            }
            return;
        }
        self.builder(test);
    }

    fn test_failed(&mut self, test: &DeviceTest, kind: FailureKind, trace: &str) {
        let marked = match kind {
            FailureKind::Failure => self.builder(test).mark_test_as_failed(trace),
            FailureKind::Error => self.builder(test).mark_test_as_errored(trace),
        };
        if let Err(err) = marked {
            warn!("{}: ignoring out-of-order failure for {test}: {err}", self.serial);
        }
    }

    fn test_ignored(&mut self, test: &DeviceTest) {
        if let Err(err) = self.builder(test).mark_test_as_ignored() {
            warn!("{}: ignoring out-of-order ignore for {test}: {err}", self.serial);
        }
    }

    fn test_assumption_failure(&mut self, test: &DeviceTest, trace: &str) {
        if let Err(err) = self.builder(test).mark_test_as_assumption_failure(trace) {
            warn!(
                "{}: ignoring out-of-order assumption failure for {test}: {err}",
                self.serial
            );
        }
    }

    fn test_ended(&mut self, test: &DeviceTest) {
        if let Err(err) = self.builder(test).end_test() {
            warn!("{}: ignoring out-of-order end for {test}: {err}", self.serial);
        }
    }

    fn test_run_failed(&mut self, message: &str) {
        warn!("{}: instrumentation run failed: {message}", self.serial);
        self.run_failures.push(message.to_string());
    }
}
