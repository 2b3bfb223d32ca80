//! JUnit XML report generation.
//!
//! Generates JUnit XML format test reports, which are the de facto
//! standard for CI/CD systems. One `<testsuite>` is emitted per device
//! serial so dashboards show where a test failed, not just that it did.
//!
//! # Format
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="4" failures="1" errors="0" time="12.301">
//!   <testsuite name="emulator-5554" tests="2" failures="0" errors="0" skipped="0" time="6.120">
//!     <testcase classname="com.example.FooTest" name="testAdd" time="1.000"/>
//!     <testcase classname="com.example.FooTest" name="testSub" time="2.000"/>
//!   </testsuite>
//!   <testsuite name="0a388e93" tests="2" failures="1" errors="0" skipped="0" time="6.181">
//!     <testcase classname="com.example.FooTest" name="testAdd" time="1.000"/>
//!     <testcase classname="com.example.FooTest" name="testSub" time="2.000">
//!       <failure message="AssertionError" type="AssertionError">...</failure>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::Reporter;
use crate::model::{DeviceResult, DeviceTestResult, FleetSummary, TestStatus};

/// Reporter that writes a JUnit XML file when the run completes.
///
/// Parent directories are created automatically if they don't exist.
pub struct JUnitReporter {
    output_path: PathBuf,
}

impl JUnitReporter {
    /// Creates a new JUnit reporter that writes to the given path.
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    /// Generate JUnit XML content for a summary.
    pub fn generate_xml(summary: &FleetSummary) -> anyhow::Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let counts = summary.test_counts();

        let mut testsuites = BytesStart::new("testsuites");
        testsuites.push_attribute(("tests", counts.total.to_string().as_str()));
        testsuites.push_attribute(("failures", counts.failed.to_string().as_str()));
        testsuites.push_attribute(("errors", counts.errored.to_string().as_str()));
        testsuites.push_attribute((
            "time",
            format!("{:.3}", summary.duration.as_secs_f64()).as_str(),
        ));
        writer.write_event(Event::Start(testsuites))?;

        for (serial, result) in &summary.results {
            write_testsuite(&mut writer, serial, result)?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

        let xml = String::from_utf8(writer.into_inner())?;
        Ok(xml)
    }
}

fn write_testsuite<W: std::io::Write>(
    writer: &mut Writer<W>,
    serial: &str,
    result: &DeviceResult,
) -> anyhow::Result<()> {
    let tests = result.test_results.len();
    let failures = result
        .test_results
        .values()
        .filter(|r| r.status == TestStatus::Fail)
        .count();
    let errors = result
        .test_results
        .values()
        .filter(|r| r.status == TestStatus::Error)
        .count();
    let skipped = result
        .test_results
        .values()
        .filter(|r| {
            matches!(r.status, TestStatus::Ignored | TestStatus::AssumptionFailure)
        })
        .count();

    let mut testsuite = BytesStart::new("testsuite");
    testsuite.push_attribute(("name", serial));
    testsuite.push_attribute(("tests", tests.to_string().as_str()));
    testsuite.push_attribute(("failures", failures.to_string().as_str()));
    testsuite.push_attribute(("errors", errors.to_string().as_str()));
    testsuite.push_attribute(("skipped", skipped.to_string().as_str()));
    testsuite.push_attribute((
        "time",
        format!("{:.3}", result.duration.as_secs_f64()).as_str(),
    ));
    writer.write_event(Event::Start(testsuite))?;

    for (test, test_result) in &result.test_results {
        write_testcase(writer, &test.class_name, &test.method_name, test_result)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    Ok(())
}

fn write_testcase<W: std::io::Write>(
    writer: &mut Writer<W>,
    classname: &str,
    name: &str,
    result: &DeviceTestResult,
) -> anyhow::Result<()> {
    let mut testcase = BytesStart::new("testcase");
    testcase.push_attribute(("classname", classname));
    testcase.push_attribute(("name", name));
    testcase.push_attribute(("time", format!("{}.000", result.duration_secs).as_str()));

    match result.status {
        TestStatus::Pass => {
            writer.write_event(Event::Empty(testcase))?;
        }
        TestStatus::Fail | TestStatus::Error => {
            writer.write_event(Event::Start(testcase))?;

            let element = if result.status == TestStatus::Fail {
                "failure"
            } else {
                "error"
            };
            let mut node = BytesStart::new(element);
            if let Some(exception) = &result.exception {
                node.push_attribute(("message", escape_xml(&exception.message).as_str()));
                node.push_attribute(("type", escape_xml(&exception.class_name).as_str()));
            }
            writer.write_event(Event::Start(node))?;

            if let Some(log) = &result.log {
                writer.write_event(Event::Text(BytesText::new(&escape_xml(log))))?;
            }

            writer.write_event(Event::End(BytesEnd::new(element)))?;
            writer.write_event(Event::End(BytesEnd::new("testcase")))?;
        }
        TestStatus::Ignored | TestStatus::AssumptionFailure => {
            writer.write_event(Event::Start(testcase))?;

            let mut skipped = BytesStart::new("skipped");
            if let Some(exception) = &result.exception {
                skipped.push_attribute(("message", escape_xml(&exception.message).as_str()));
            }
            writer.write_event(Event::Empty(skipped))?;

            writer.write_event(Event::End(BytesEnd::new("testcase")))?;
        }
    }

    Ok(())
}

#[async_trait]
impl Reporter for JUnitReporter {
    async fn on_fleet_start(&self, _serials: &[String]) {}

    async fn on_device_start(&self, _serial: &str) {}

    async fn on_device_complete(&self, _serial: &str, _result: &DeviceResult) {}

    async fn on_run_complete(&self, summary: &FleetSummary, _success: bool) {
        match Self::generate_xml(summary) {
            Ok(xml) => {
                if let Some(parent) = self.output_path.parent()
                    && !parent.exists()
                    && let Err(e) = std::fs::create_dir_all(parent)
                {
                    tracing::error!("Failed to create output directory: {}", e);
                    return;
                }

                if let Err(e) = std::fs::write(&self.output_path, xml) {
                    tracing::error!("Failed to write JUnit XML: {}", e);
                } else {
                    tracing::info!("JUnit XML written to: {}", self.output_path.display());
                }
            }
            Err(e) => {
                tracing::error!("Failed to generate JUnit XML: {}", e);
            }
        }
    }
}

/// Escape special XML characters and strip characters XML cannot carry.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
        .chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}'))
        .collect()
}
