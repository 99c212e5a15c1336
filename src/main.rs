//! CLI entry point for lecroy_daq
//!
//! Provides command-line access to the detector:
//! - `grab`: initialize, acquire one or more results, optionally save them as CSV
//! - `resources`: list VISA resources (feature `instrument_visa`)
//! - `settings`: print the settings tree as JSON
//! - `config`: print the effective configuration as TOML
//!
//! # Usage
//!
//! ```bash
//! lecroy_daq grab --config config/lecroy.toml --count 10 --output-dir data
//! lecroy_daq grab --set memorySize=25K --set number_of_segments=4
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use lecroy_daq::config::{LecroyConfig, DEFAULT_CONFIG_PATH};
use lecroy_daq::events::{DetectorEvent, StatusLevel};
use lecroy_daq::storage::CsvWriter;
use lecroy_daq::tracing_setup::{self, OutputFormat, TracingConfig};
use lecroy_daq::{driver, LecroyDetector};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lecroy_daq")]
#[command(about = "LeCroy WaveRunner oscilloscope as a 1-D detector", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire results from the oscilloscope
    Grab {
        /// Number of grabs
        #[arg(long, default_value_t = 1)]
        count: usize,

        /// Write each result as a CSV file into this directory
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Override a setting after initialization, as NAME=VALUE
        #[arg(long = "set", value_name = "NAME=VALUE")]
        overrides: Vec<String>,
    },

    /// List VISA resources
    Resources,

    /// Print the settings tree as JSON
    Settings,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = LecroyConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate().map_err(|e| anyhow!(e))?;

    let level = tracing_setup::parse_log_level(&config.application.log_level)
        .map_err(|e| anyhow!(e))?;
    tracing_setup::init(TracingConfig::new(level).with_format(cli.log_format))
        .map_err(|e| anyhow!(e))?;

    match cli.command {
        Commands::Grab {
            count,
            output_dir,
            overrides,
        } => grab(&config, count, output_dir, &overrides).await,
        Commands::Resources => list_resources().await,
        Commands::Settings => print_settings(&config).await,
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn grab(
    config: &LecroyConfig,
    count: usize,
    output_dir: Option<PathBuf>,
    overrides: &[String],
) -> Result<()> {
    let detector = LecroyDetector::new(config)?;
    let mut events = detector.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let DetectorEvent::Status(status) = event {
                match status.level {
                    StatusLevel::Error => eprintln!("[{}] {}", status.title, status.message),
                    _ => tracing::info!("[{}] {}", status.title, status.message),
                }
            }
        }
    });

    let info = detector.initialize().await.context("initializing detector")?;
    println!("Connected: {}", info.info);

    for entry in overrides {
        let (name, value) = parse_override(entry)?;
        detector
            .apply_named(name, &value)
            .await
            .with_context(|| format!("applying {entry}"))?;
    }

    let writer = output_dir.map(CsvWriter::new).transpose()?;

    for i in 0..count {
        let result = detector.grab().await.context("grab failed")?;
        let samples = result.time_axis.data.len();
        match &writer {
            Some(writer) => {
                let path = writer.write(&result)?;
                println!("grab {}: {} samples -> {}", i + 1, samples, path.display());
            }
            None => println!(
                "grab {}: {} samples, channels {:?}",
                i + 1,
                samples,
                result.labels()
            ),
        }
    }

    detector.stop().await?;
    detector.close().await?;
    Ok(())
}

/// Split `NAME=VALUE`; the value is read as JSON when it parses, as a string
/// otherwise.
fn parse_override(entry: &str) -> Result<(&str, serde_json::Value)> {
    let (name, raw) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{entry}'"))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::from(raw));
    Ok((name.trim(), value))
}

async fn list_resources() -> Result<()> {
    let resources = driver::discover_resources().await?;
    if resources.is_empty() {
        println!("No VISA resources found");
    }
    for resource in resources {
        println!("{resource}");
    }
    Ok(())
}

async fn print_settings(config: &LecroyConfig) -> Result<()> {
    let detector = LecroyDetector::new(config)?;
    let snapshot = detector.settings_snapshot().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
