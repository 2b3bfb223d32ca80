//! Fleet-level orchestration.
//!
//! Fans one [`DeviceExecutor`] out per target device and assembles the
//! [`FleetSummary`]. Exactly one target runs inline in the calling task;
//! more than one runs as isolated tokio tasks whose panics are caught at
//! join time and recorded as that device's failure, so a crashing worker
//! never takes down the orchestrator or a sibling. The join waits for
//! every worker: there is no fleet-level timeout or early cancellation,
//! so a hung device hangs the run.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::backend::DeviceBackend;
use crate::config::Config;
use crate::executor::{DeviceExecutor, ExecutionPlan};
use crate::manifest::InstrumentationInfo;
use crate::merge::documents::{self, RESULT_DOCUMENT};
use crate::model::{DeviceResult, ExceptionInfo, FleetSummary, FleetSummaryBuilder};
use crate::report::Reporter;

/// Result of an entire fleet run.
#[derive(Debug, Clone)]
pub struct FleetRun {
    pub summary: FleetSummary,
    /// Overall pass/fail verdict, see [`FleetSummary::is_success`].
    pub success: bool,
}

impl FleetRun {
    /// Exit code for this run: non-zero only when the run failed and the
    /// caller opted into failing on failure.
    pub fn exit_code(&self, fail_on_failure: bool) -> i32 {
        if !self.success && fail_on_failure { 1 } else { 0 }
    }
}

/// Coordinates a full run across the target fleet.
pub struct FleetOrchestrator<B: ?Sized> {
    config: Config,
    backend: Arc<B>,
    reporter: Arc<dyn Reporter>,
}

impl<B: DeviceBackend + ?Sized + 'static> FleetOrchestrator<B> {
    pub fn new(config: Config, backend: Arc<B>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            config,
            backend,
            reporter,
        }
    }

    /// Run the suite on every target device and assemble the summary.
    ///
    /// Only manifest extraction and configuration problems are fatal here;
    /// anything that goes wrong on a device becomes data in its
    /// [`DeviceResult`].
    pub async fn run(&self) -> anyhow::Result<FleetRun> {
        // Package/runner identity is required input for every device, so
        // extraction failure aborts before any device work starts.
        let info = InstrumentationInfo::from_artifact(&self.config.artifacts.instrumentation)
            .with_context(|| {
                format!(
                    "failed to extract instrumentation info from {}",
                    self.config.artifacts.instrumentation.display()
                )
            })?;

        let serials = self.target_serials().await?;
        if serials.is_empty() {
            anyhow::bail!("no target devices (none connected, none configured)");
        }
        info!(
            "targeting {} device(s) with {}/{}",
            serials.len(),
            info.instrumentation_package,
            info.test_runner_class
        );

        // Clear stale results and partition the output tree by serial
        // before any worker writes to it.
        let output_dir = self.config.report.output_dir.clone();
        if output_dir.exists() {
            std::fs::remove_dir_all(&output_dir).ok();
        }
        for serial in &serials {
            std::fs::create_dir_all(output_dir.join(serial))?;
        }

        self.reporter.on_fleet_start(&serials).await;

        let mut builder = FleetSummaryBuilder::new(self.config.fleet.title.clone());
        builder.start()?;
        let summary = Arc::new(Mutex::new(builder));

        let args = self.instrumentation_args()?;

        if let [serial] = serials.as_slice() {
            // A single target runs inline: no task overhead, and a panic
            // here has no siblings to protect.
            let executor = DeviceExecutor::new(self.backend.clone(), self.reporter.clone());
            let result = executor.execute(&self.plan(serial, &info, &output_dir, &args)).await;
            summary.lock().await.add_result(serial.as_str(), result)?;
        } else {
            let mut workers = Vec::with_capacity(serials.len());
            for serial in &serials {
                let executor = DeviceExecutor::new(self.backend.clone(), self.reporter.clone());
                let plan = self.plan(serial, &info, &output_dir, &args);
                let summary = summary.clone();
                let serial = serial.clone();
                workers.push((
                    serial.clone(),
                    tokio::spawn(async move {
                        let result = executor.execute(&plan).await;
                        // The summary builder is the only shared mutable
                        // state; one writer at a time.
                        if let Err(err) = summary.lock().await.add_result(serial.as_str(), result) {
                            error!("{serial}: could not record result: {err}");
                        }
                    }),
                ));
            }

            // Block until every worker has reported. No partial
            // completion: a hung worker hangs the fleet.
            for (serial, worker) in workers {
                if let Err(join_err) = worker.await {
                    error!("{serial}: worker crashed: {join_err}");
                    let crashed =
                        DeviceResult::from_exception(ExceptionInfo::new("WorkerCrashed", panic_message(join_err)));
                    if let Err(err) = summary.lock().await.add_result(serial.as_str(), crashed) {
                        error!("{serial}: could not record crashed worker: {err}");
                    }
                }
            }
        }

        let mut builder = Arc::try_unwrap(summary)
            .map_err(|_| anyhow::anyhow!("summary builder still shared after join"))?
            .into_inner();
        builder.end()?;
        let summary = builder.build()?;
        let success = summary.is_success();

        let document = output_dir.join(RESULT_DOCUMENT);
        documents::write_summary(&document, &summary)?;
        info!("result document written to {}", document.display());

        self.reporter.on_run_complete(&summary, success).await;
        Ok(FleetRun { summary, success })
    }

    /// List connected devices without running anything.
    pub async fn list_devices(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.backend.list_devices().await?)
    }

    /// Configured serials, or every connected device when none are
    /// configured. Duplicates collapse to first occurrence.
    async fn target_serials(&self) -> anyhow::Result<Vec<String>> {
        let mut serials = if self.config.fleet.serials.is_empty() {
            self.backend
                .list_devices()
                .await
                .context("failed to list connected devices")?
        } else {
            self.config.fleet.serials.clone()
        };
        let mut seen = HashSet::new();
        serials.retain(|serial| seen.insert(serial.clone()));
        Ok(serials)
    }

    fn plan(
        &self,
        serial: &str,
        info: &InstrumentationInfo,
        output_dir: &Path,
        args: &[(String, String)],
    ) -> ExecutionPlan {
        ExecutionPlan {
            serial: serial.to_string(),
            application: self.config.artifacts.application.clone(),
            instrumentation: self.config.artifacts.instrumentation.clone(),
            info: info.clone(),
            output_dir: output_dir.join(serial),
            instrumentation_args: args.to_vec(),
        }
    }

    /// Split the configured `key=value` argument string, plus the debug
    /// flag when enabled.
    fn instrumentation_args(&self) -> anyhow::Result<Vec<(String, String)>> {
        let mut args = Vec::new();
        if let Some(raw) = &self.config.fleet.instrumentation_args {
            for word in shell_words::split(raw).context("invalid instrumentation_args")? {
                match word.split_once('=') {
                    Some((key, value)) => args.push((key.to_string(), value.to_string())),
                    None => {
                        warn!("ignoring malformed instrumentation argument `{word}` (want key=value)");
                    }
                }
            }
        }
        if self.config.fleet.debug {
            args.push(("debug".to_string(), "true".to_string()));
        }
        Ok(args)
    }
}

/// Human-readable description of a worker's panic payload.
fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
