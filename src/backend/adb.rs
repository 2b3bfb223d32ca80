//! Adb transport backend.
//!
//! Drives devices by shelling out to the `adb` binary with
//! `tokio::process`. Short commands (install, getprop, pull) run under a
//! configurable timeout; the instrumentation run itself is unbounded,
//! matching the fleet-level no-timeout policy.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::protocol::InstrumentationOutputParser;
use super::{BackendError, BackendResult, DeviceBackend, RunListener};
use crate::model::DeviceDetails;

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;

/// Output of one adb invocation.
#[derive(Debug)]
struct AdbOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

impl AdbOutput {
    fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Backend that talks to devices through the `adb` binary.
pub struct AdbBackend {
    adb: PathBuf,
    command_timeout: Duration,
}

impl AdbBackend {
    /// Create a backend using the given `adb` binary.
    pub fn new(adb: impl Into<PathBuf>) -> Self {
        Self {
            adb: adb.into(),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }

    /// Set the timeout applied to short-lived adb commands.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Run an adb command to completion under the command timeout.
    async fn adb(&self, serial: Option<&str>, args: &[&str]) -> BackendResult<AdbOutput> {
        let mut command = Command::new(&self.adb);
        if let Some(serial) = serial {
            command.arg("-s").arg(serial);
        }
        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        debug!("adb {}", args.join(" "));
        let output = tokio::time::timeout(self.command_timeout, command.output())
            .await
            .map_err(|_| BackendError::Timeout(self.command_timeout.as_secs()))??;

        Ok(AdbOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[async_trait]
impl DeviceBackend for AdbBackend {
    async fn list_devices(&self) -> BackendResult<Vec<String>> {
        let output = self.adb(None, &["devices"]).await?;
        if !output.success() {
            return Err(BackendError::CommandFailed {
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(parse_device_list(&output.stdout))
    }

    async fn device_details(&self, serial: &str) -> BackendResult<DeviceDetails> {
        let output = self.adb(Some(serial), &["shell", "getprop"]).await?;
        if !output.success() {
            return Err(BackendError::DeviceNotFound(serial.to_string()));
        }
        Ok(parse_device_details(&output.stdout))
    }

    async fn install_package(&self, serial: &str, artifact: &Path) -> BackendResult<()> {
        let path = artifact.to_string_lossy();
        let output = self.adb(Some(serial), &["install", "-r", &path]).await?;
        // `adb install` can exit 0 and still report Failure on stdout.
        if output.success() && output.stdout.contains("Success") {
            return Ok(());
        }
        let message = output
            .stdout
            .lines()
            .chain(output.stderr.lines())
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .next_back()
            .unwrap_or("install produced no output")
            .to_string();
        Err(BackendError::InstallFailed {
            artifact: artifact.display().to_string(),
            message,
        })
    }

    async fn run_instrumentation(
        &self,
        serial: &str,
        test_package: &str,
        runner_class: &str,
        args: &[(String, String)],
        listener: &mut dyn RunListener,
    ) -> BackendResult<()> {
        let component = format!("{test_package}/{runner_class}");
        let mut command = Command::new(&self.adb);
        command.args(["-s", serial, "shell", "am", "instrument", "-w", "-r"]);
        for (key, value) in args {
            command.arg("-e").arg(key).arg(value);
        }
        command.arg(&component);
        command.stdout(Stdio::piped());
        // Nothing reads stderr during the run; a piped-but-undrained
        // stderr can block the child once the pipe buffer fills.
        command.stderr(Stdio::null());

        debug!("running instrumentation {component} on {serial}");
        let mut child = command.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::RunFailed("instrumentation produced no output pipe".into()))?;

        let mut parser = InstrumentationOutputParser::new();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            parser.parse_line(&line, listener);
        }
        parser.finish(listener);

        let status = child.wait().await?;
        if !status.success() {
            warn!("adb instrumentation process exited with {status} on {serial}");
        }
        Ok(())
    }

    async fn pull_directory(&self, serial: &str, remote: &str, local: &Path) -> BackendResult<()> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let local_path = local.to_string_lossy();
        let output = self.adb(Some(serial), &["pull", remote, &local_path]).await?;
        if !output.success() {
            return Err(BackendError::PullFailed {
                remote: remote.to_string(),
                message: if output.stderr.trim().is_empty() {
                    output.stdout.trim().to_string()
                } else {
                    output.stderr.trim().to_string()
                },
            });
        }
        Ok(())
    }

    async fn shell(&self, serial: &str, command: &str) -> BackendResult<String> {
        let output = self.adb(Some(serial), &["shell", command]).await?;
        if !output.success() {
            return Err(BackendError::CommandFailed {
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }

    fn name(&self) -> &'static str {
        "adb"
    }
}

/// Parse `adb devices` output into serials of usable devices. Offline
/// and unauthorized devices are excluded.
fn parse_device_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1) // "List of devices attached"
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            (state == "device").then(|| serial.to_string())
        })
        .collect()
}

fn getprop_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\[([^\]]+)\]:\s*\[([^\]]*)\]$").expect("valid literal regex"))
}

/// Parse `getprop` output into device metadata.
fn parse_device_details(output: &str) -> DeviceDetails {
    let mut details = DeviceDetails::default();
    for line in output.lines() {
        let Some(captures) = getprop_pattern().captures(line.trim()) else {
            continue;
        };
        let value = captures[2].to_string();
        match &captures[1] {
            "ro.product.model" => details.model = value,
            "ro.product.manufacturer" => details.manufacturer = value,
            "ro.build.version.release" => details.version = value,
            "ro.build.version.sdk" => details.api_level = value.parse().unwrap_or(0),
            "persist.sys.locale" => details.locale = value,
            "ro.product.locale" => {
                if details.locale.is_empty() {
                    details.locale = value;
                }
            }
            _ => {}
        }
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let output = "List of devices attached\n\
                      emulator-5554\tdevice\n\
                      0a388e93\tdevice usb:1-1 product:sargo\n\
                      9b12ef04\toffline\n\
                      3c77aa10\tunauthorized\n";
        assert_eq!(
            parse_device_list(output),
            vec!["emulator-5554".to_string(), "0a388e93".to_string()]
        );
    }

    #[test]
    fn test_parse_device_list_empty() {
        assert!(parse_device_list("List of devices attached\n").is_empty());
    }

    #[test]
    fn test_parse_device_details() {
        let output = "[ro.product.model]: [Pixel 8]\n\
                      [ro.product.manufacturer]: [Google]\n\
                      [ro.build.version.release]: [14]\n\
                      [ro.build.version.sdk]: [34]\n\
                      [persist.sys.locale]: [en-US]\n\
                      [ro.other]: [ignored]\n";
        let details = parse_device_details(output);
        assert_eq!(details.model, "Pixel 8");
        assert_eq!(details.manufacturer, "Google");
        assert_eq!(details.version, "14");
        assert_eq!(details.api_level, 34);
        assert_eq!(details.locale, "en-US");
    }

    #[test]
    fn test_locale_falls_back_to_product_locale() {
        let output = "[ro.product.locale]: [de-DE]\n";
        assert_eq!(parse_device_details(output).locale, "de-DE");
    }
}
