//! Configuration loading and schema definitions for fleet.
//!
//! Configuration is a TOML file, `fleet.toml` by default. The schema has
//! three sections: `[fleet]` for run settings, `[artifacts]` for the two
//! apks to install, and `[report]` for output options.
//!
//! # Example
//!
//! ```toml
//! [fleet]
//! title = "nightly"
//! adb = "~/Android/sdk/platform-tools/adb"
//! serials = ["emulator-5554"]
//! fail_on_failure = true
//! instrumentation_args = "size=large"
//!
//! [artifacts]
//! application = "app/build/outputs/apk/debug/app-debug.apk"
//! instrumentation = "app/build/outputs/apk/androidTest/debug/app-debug-androidTest.apk"
//!
//! [report]
//! output_dir = "fleet-output"
//! junit = true
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Core run settings.
    pub fleet: FleetConfig,

    /// Artifacts to install on every target device.
    pub artifacts: ArtifactsConfig,

    /// Output and reporting settings (optional, has defaults).
    #[serde(default)]
    pub report: ReportConfig,
}

/// Core run settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FleetConfig {
    /// Run title, used in reports and the summary document.
    ///
    /// Default: `"fleet"`
    #[serde(default = "default_title")]
    pub title: String,

    /// Target device serials. Empty means every connected device.
    #[serde(default)]
    pub serials: Vec<String>,

    /// Path to the adb binary. `~` is expanded.
    ///
    /// Default: `"adb"` (resolved from `PATH`)
    #[serde(default = "default_adb")]
    pub adb: String,

    /// Timeout for short-lived transport commands, in seconds. The
    /// instrumentation run itself is never bounded.
    ///
    /// Default: 120
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Exit non-zero when the run fails.
    #[serde(default)]
    pub fail_on_failure: bool,

    /// Pass `-e debug true` to the instrumentation runner.
    #[serde(default)]
    pub debug: bool,

    /// Extra `key=value` arguments for the instrumentation runner,
    /// whitespace-separated with shell quoting.
    pub instrumentation_args: Option<String>,
}

/// The artifact pair installed on each device.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactsConfig {
    /// Application under test. `~` is expanded.
    pub application: PathBuf,

    /// Instrumentation (test) artifact; its manifest names the runner.
    /// `~` is expanded.
    pub instrumentation: PathBuf,
}

/// Output and reporting settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Directory the run writes into, partitioned by device serial.
    /// Cleared at the start of each run.
    ///
    /// Default: `"fleet-output"`
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Write a JUnit XML report alongside the summary document.
    ///
    /// Default: true
    #[serde(default = "default_junit")]
    pub junit: bool,

    /// Filename of the JUnit XML report inside the output directory.
    ///
    /// Default: `"junit.xml"`
    #[serde(default = "default_junit_file")]
    pub junit_file: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            serials: Vec::new(),
            adb: default_adb(),
            command_timeout_secs: default_command_timeout(),
            fail_on_failure: false,
            debug: false,
            instrumentation_args: None,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            junit: default_junit(),
            junit_file: default_junit_file(),
        }
    }
}

fn default_title() -> String {
    "fleet".to_string()
}

fn default_adb() -> String {
    "adb".to_string()
}

fn default_command_timeout() -> u64 {
    120
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("fleet-output")
}

fn default_junit() -> bool {
    true
}

fn default_junit_file() -> String {
    "junit.xml".to_string()
}

/// Load configuration from a TOML file, expanding `~` in configured
/// paths.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    load_config_str(&raw)
}

/// Load configuration from a TOML string.
pub fn load_config_str(raw: &str) -> anyhow::Result<Config> {
    let mut config: Config = toml::from_str(raw).context("invalid configuration")?;
    config.fleet.adb = expand(&config.fleet.adb);
    config.artifacts.application = PathBuf::from(expand(&config.artifacts.application.to_string_lossy()));
    config.artifacts.instrumentation =
        PathBuf::from(expand(&config.artifacts.instrumentation.to_string_lossy()));
    Ok(config)
}

fn expand(path: &str) -> String {
    shellexpand::tilde(path).to_string()
}
