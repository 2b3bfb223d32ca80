//! Run reporting and output generation.

pub mod junit;

use async_trait::async_trait;

use crate::model::{DeviceResult, FleetSummary, TestStatus};

pub use junit::JUnitReporter;

/// A reporter receives events during a fleet run.
///
/// Device completion events may arrive in any order; only "all expected
/// serials eventually complete" is guaranteed.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once the target serials are known, before any device work.
    async fn on_fleet_start(&self, serials: &[String]);

    /// Called when a device's executor begins.
    async fn on_device_start(&self, serial: &str);

    /// Called when a device's result is complete.
    async fn on_device_complete(&self, serial: &str, result: &DeviceResult);

    /// Called when the whole run has been assembled.
    async fn on_run_complete(&self, summary: &FleetSummary, success: bool);
}

/// A reporter that does nothing (for tests or when output is not needed).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_fleet_start(&self, _serials: &[String]) {}
    async fn on_device_start(&self, _serial: &str) {}
    async fn on_device_complete(&self, _serial: &str, _result: &DeviceResult) {}
    async fn on_run_complete(&self, _summary: &FleetSummary, _success: bool) {}
}

/// A reporter that fans events out to multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_fleet_start(&self, serials: &[String]) {
        for reporter in &self.reporters {
            reporter.on_fleet_start(serials).await;
        }
    }

    async fn on_device_start(&self, serial: &str) {
        for reporter in &self.reporters {
            reporter.on_device_start(serial).await;
        }
    }

    async fn on_device_complete(&self, serial: &str, result: &DeviceResult) {
        for reporter in &self.reporters {
            reporter.on_device_complete(serial, result).await;
        }
    }

    async fn on_run_complete(&self, summary: &FleetSummary, success: bool) {
        for reporter in &self.reporters {
            reporter.on_run_complete(summary, success).await;
        }
    }
}

/// Console reporter showing per-device progress in the terminal.
pub struct ConsoleReporter {
    progress: std::sync::Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: std::sync::Mutex::new(None),
            verbose,
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_fleet_start(&self, serials: &[String]) {
        println!("Running on {} device(s)", serials.len());

        let pb = indicatif::ProgressBar::new(serials.len() as u64);
        pb.set_style(
            indicatif::ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} devices ({eta})",
                )
                .unwrap()
                .progress_chars("#>-"),
        );

        *self.progress.lock().unwrap() = Some(pb);
    }

    async fn on_device_start(&self, serial: &str) {
        if self.verbose {
            println!("Starting: {}", serial);
        }
    }

    async fn on_device_complete(&self, serial: &str, result: &DeviceResult) {
        if let Some(pb) = self.progress.lock().unwrap().as_ref() {
            pb.inc(1);

            let failed = result
                .test_results
                .values()
                .filter(|r| !r.status.is_pass())
                .count();
            let passed = failed == 0 && result.exceptions.is_empty() && !result.install_failed;

            let line = if result.install_failed {
                format!(
                    "{} {} (install failed: {})",
                    console::style("FAIL").red().bold(),
                    serial,
                    result.install_message.as_deref().unwrap_or("unknown")
                )
            } else if passed {
                format!(
                    "{} {} ({} tests)",
                    console::style("PASS").green(),
                    serial,
                    result.test_results.len()
                )
            } else {
                format!(
                    "{} {} ({} of {} tests failed, {} exception(s))",
                    console::style("FAIL").red(),
                    serial,
                    failed,
                    result.test_results.len(),
                    result.exceptions.len()
                )
            };

            if self.verbose || !passed {
                pb.println(line);
            }
        }
    }

    async fn on_run_complete(&self, summary: &FleetSummary, success: bool) {
        if let Some(pb) = self.progress.lock().unwrap().take() {
            pb.finish_and_clear();
        }

        let counts = summary.test_counts();
        println!();
        println!("Fleet Results: {}", summary.title);
        println!("  Devices:  {}", summary.results.len());
        println!("  Tests:    {}", counts.total);
        println!("  Passed:   {}", console::style(counts.passed).green());
        println!("  Failed:   {}", console::style(counts.failed).red());
        if counts.errored > 0 {
            println!("  Errored:  {}", console::style(counts.errored).red().bold());
        }
        if counts.ignored > 0 {
            println!("  Ignored:  {}", console::style(counts.ignored).yellow());
        }
        if counts.assumption_failures > 0 {
            println!(
                "  Assumed:  {}",
                console::style(counts.assumption_failures).yellow()
            );
        }
        println!("  Duration: {:?}", summary.duration);

        if success {
            println!();
            println!("{}", console::style("All devices passed!").green().bold());
            return;
        }

        println!();
        println!("{}", console::style("Fleet run failed.").red().bold());
        for (serial, result) in &summary.results {
            if result.install_failed {
                println!(
                    "  - {}: install failed: {}",
                    serial,
                    result.install_message.as_deref().unwrap_or("unknown")
                );
            }
            for exception in &result.exceptions {
                println!("  - {}: {}", serial, console::style(exception).dim());
            }
            for (test, test_result) in &result.test_results {
                if test_result.status == TestStatus::Pass {
                    continue;
                }
                println!("  - {}: {}", serial, test);
                if let Some(exception) = &test_result.exception {
                    println!("    {}", console::style(exception).dim());
                }
            }
        }
    }
}
