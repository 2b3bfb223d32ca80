//! fleet CLI - Parallel instrumentation test runner for device fleets.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use fleet::DeviceBackend;
use fleet::backend::adb::AdbBackend;
use fleet::config::{self, Config};
use fleet::manifest::InstrumentationInfo;
use fleet::merge::{documents, merge_summaries};
use fleet::orchestrator::FleetOrchestrator;
use fleet::report::{ConsoleReporter, JUnitReporter, MultiReporter};

#[derive(Parser)]
#[command(name = "fleet")]
#[command(about = "Parallel instrumentation test runner for device fleets", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "fleet.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the instrumentation suite across the fleet
    Run {
        /// Target only these serials (repeatable; overrides config)
        #[arg(short, long)]
        serial: Vec<String>,

        /// Override the run title
        #[arg(short, long)]
        title: Option<String>,

        /// Override the output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Exit non-zero when the run fails
        #[arg(long)]
        fail_on_failure: bool,
    },

    /// List connected devices
    Devices,

    /// Print instrumentation info extracted from a test artifact
    Manifest {
        /// Artifact path (defaults to the configured instrumentation apk)
        artifact: Option<PathBuf>,
    },

    /// Merge result documents from multiple runs into one
    Merge {
        /// Title for the merged summary
        #[arg(short, long)]
        title: Option<String>,

        /// Output directory for the merged document and images
        #[arg(short, long)]
        output: PathBuf,

        /// Input result documents
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            serial,
            title,
            output,
            fail_on_failure,
        } => run_fleet(&cli.config, serial, title, output, fail_on_failure, cli.verbose).await,
        Commands::Devices => list_devices(&cli.config).await,
        Commands::Manifest { artifact } => print_manifest(&cli.config, artifact),
        Commands::Merge {
            title,
            output,
            inputs,
        } => merge_documents(title, &output, &inputs),
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(),
    }
}

async fn run_fleet(
    config_path: &Path,
    serial_override: Vec<String>,
    title_override: Option<String>,
    output_override: Option<PathBuf>,
    fail_on_failure: bool,
    verbose: bool,
) -> Result<()> {
    let mut config = config::load_config(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    // Apply overrides
    if !serial_override.is_empty() {
        config.fleet.serials = serial_override;
    }
    if let Some(title) = title_override {
        config.fleet.title = title;
    }
    if let Some(output) = output_override {
        config.report.output_dir = output;
    }
    if fail_on_failure {
        config.fleet.fail_on_failure = true;
    }

    info!("loaded configuration from {}", config_path.display());

    let backend = Arc::new(create_backend(&config));
    let reporter = Arc::new(create_reporter(&config, verbose));
    let fail = config.fleet.fail_on_failure;
    let orchestrator = FleetOrchestrator::new(config, backend, reporter);

    let run = orchestrator.run().await?;
    std::process::exit(run.exit_code(fail));
}

async fn list_devices(config_path: &Path) -> Result<()> {
    let config = config::load_config(config_path)?;
    let backend = create_backend(&config);

    let serials = backend.list_devices().await?;
    if serials.is_empty() {
        println!("No devices connected.");
        return Ok(());
    }
    println!("Connected devices:");
    for serial in serials {
        println!("  {serial}");
    }
    Ok(())
}

fn print_manifest(config_path: &Path, artifact: Option<PathBuf>) -> Result<()> {
    let artifact = match artifact {
        Some(path) => path,
        None => config::load_config(config_path)?.artifacts.instrumentation,
    };
    let info = InstrumentationInfo::from_artifact(&artifact)
        .with_context(|| format!("failed to parse {}", artifact.display()))?;

    println!("Application package:     {}", info.application_package);
    println!("Instrumentation package: {}", info.instrumentation_package);
    println!("Minimum SDK:             {}", info.min_sdk_version);
    println!("Test runner:             {}", info.test_runner_class);
    Ok(())
}

fn merge_documents(title: Option<String>, output: &Path, inputs: &[PathBuf]) -> Result<()> {
    let mut summaries = Vec::with_capacity(inputs.len());
    for input in inputs {
        let mut summary = documents::load_summary(input)?;
        let document_dir = input.parent().unwrap_or_else(|| Path::new("."));
        documents::relocate_images(&mut summary, document_dir, output)?;
        summaries.push(summary);
    }

    let merged = merge_summaries(&summaries, title.as_deref())?;
    let document = output.join(documents::RESULT_DOCUMENT);
    documents::write_summary(&document, &merged)?;

    let counts = merged.test_counts();
    println!(
        "Merged {} document(s): {} device(s), {} test(s)",
        inputs.len(),
        merged.results.len(),
        counts.total
    );
    println!("Merged document written to {}", document.display());
    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Title:           {}", config.fleet.title);
            println!("  Adb:             {}", config.fleet.adb);
            println!(
                "  Serials:         {}",
                if config.fleet.serials.is_empty() {
                    "all connected".to_string()
                } else {
                    config.fleet.serials.join(", ")
                }
            );
            println!("  Application:     {}", config.artifacts.application.display());
            println!("  Instrumentation: {}", config.artifacts.instrumentation.display());
            println!("  Output:          {}", config.report.output_dir.display());
            println!("  Fail on failure: {}", config.fleet.fail_on_failure);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    }
}

fn init_config() -> Result<()> {
    let config = r#"# fleet configuration file

[fleet]
title = "fleet"
# Path to adb; defaults to resolving from PATH.
adb = "adb"
# Target serials; empty means every connected device.
serials = []
fail_on_failure = true
# instrumentation_args = "size=large"

[artifacts]
application = "app/build/outputs/apk/debug/app-debug.apk"
instrumentation = "app/build/outputs/apk/androidTest/debug/app-debug-androidTest.apk"

[report]
output_dir = "fleet-output"
junit = true
junit_file = "junit.xml"
"#;

    let path = PathBuf::from("fleet.toml");
    if path.exists() {
        eprintln!("fleet.toml already exists. Remove it first or edit manually.");
        std::process::exit(1);
    }

    std::fs::write(&path, config)?;
    println!("Created fleet.toml");
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  fleet run");

    Ok(())
}

fn create_backend(config: &Config) -> AdbBackend {
    AdbBackend::new(&config.fleet.adb)
        .with_command_timeout(Duration::from_secs(config.fleet.command_timeout_secs))
}

fn create_reporter(config: &Config, verbose: bool) -> MultiReporter {
    let mut multi = MultiReporter::new();

    // Add console reporter
    multi = multi.with_reporter(ConsoleReporter::new(verbose));

    // Add JUnit reporter if enabled
    if config.report.junit {
        let junit_path = config.report.output_dir.join(&config.report.junit_file);
        multi = multi.with_reporter(JUnitReporter::new(junit_path));
    }

    multi
}
