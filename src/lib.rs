//! fleet: a parallel instrumentation test runner for Android device fleets.
//!
//! This crate installs an application and its instrumentation artifact on
//! every target device, runs the test suite on each device concurrently,
//! harvests evidence (screenshots, animations, failure traces), and
//! produces one merged, queryable result document.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Manifest**: Extracts package/runner identity from the binary
//!   manifest inside a test artifact
//! - **Backend**: The device transport contract and its adb implementation
//! - **Executor**: Runs one device's install → run → harvest cycle
//! - **Orchestrator**: Fans executors out across the fleet and decides
//!   overall pass/fail
//! - **Merge**: Combines result documents from repeated runs or hosts
//! - **Report**: Console progress and JUnit XML output
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fleet::backend::adb::AdbBackend;
//! use fleet::config::load_config;
//! use fleet::orchestrator::FleetOrchestrator;
//! use fleet::report::NullReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("fleet.toml"))?;
//!     let backend = Arc::new(AdbBackend::new(&config.fleet.adb));
//!     let orchestrator = FleetOrchestrator::new(config, backend, Arc::new(NullReporter));
//!     let run = orchestrator.run().await?;
//!     println!("success: {}", run.success);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod executor;
pub mod manifest;
pub mod merge;
pub mod model;
pub mod orchestrator;
pub mod report;

// Re-export commonly used types
pub use backend::{DeviceBackend, RunListener};
pub use config::{Config, load_config};
pub use manifest::InstrumentationInfo;
pub use merge::merge_summaries;
pub use model::{DeviceResult, DeviceTest, DeviceTestResult, FleetSummary, TestStatus};
pub use orchestrator::{FleetOrchestrator, FleetRun};
pub use report::Reporter;
