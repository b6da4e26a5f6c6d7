//! stromd - telemetry-processing daemon
//!
//! Loads a TOML config describing inputs, decoders, filters, and outputs,
//! wires them into the pipeline, and runs until a shutdown signal or an
//! unrecoverable fault.
//!
//! # Usage
//!
//! ```bash
//! stromd --config strom.toml
//! stromd --config strom.toml --log-level debug
//! ```
//!
//! Exit status is 0 on clean shutdown and non-zero on a startup failure,
//! retry exhaustion, or a fatal script host error.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use strom_config::{Config, LogConfig, LogFormat, LogOutput};
use strom_pipeline::{PipelineBuilder, PluginRegistry};

/// Telemetry-processing daemon
#[derive(Parser, Debug)]
#[command(name = "stromd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "strom.toml")]
    config: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    init_logging(&config.log, cli.log_level.as_deref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        plugins = config.plugins.len(),
        "stromd starting"
    );

    let mut registry = PluginRegistry::new();
    strom_plugins::register_builtins(&mut registry);

    let pipeline = PipelineBuilder::new(&config, &registry)
        .build()
        .context("pipeline startup failed")?;

    // First ctrl-c requests a graceful drain; the engine bounds it.
    let globals = pipeline.globals();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            globals.shut_down();
        }
    });

    pipeline.run().await.context("pipeline terminated")?;
    info!("clean shutdown");
    Ok(())
}

/// Initialize the tracing subscriber from config, honoring a CLI override
fn init_logging(log: &LogConfig, override_level: Option<&str>) -> anyhow::Result<()> {
    let directive = override_level.unwrap_or(log.level.as_str());
    let filter = EnvFilter::try_new(directive)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {e}"))?;

    let layer = match (&log.format, &log.output) {
        (LogFormat::Console, LogOutput::Stdout) => fmt::layer().with_target(true).boxed(),
        (LogFormat::Console, LogOutput::Stderr) => fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        (LogFormat::Json, LogOutput::Stdout) => fmt::layer().json().boxed(),
        (LogFormat::Json, LogOutput::Stderr) => {
            fmt::layer().json().with_writer(std::io::stderr).boxed()
        }
        (format, LogOutput::File(path)) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            let writer = std::sync::Arc::new(file);
            match format {
                LogFormat::Console => fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
                LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
            }
        }
    };

    tracing_subscriber::registry().with(layer).with(filter).init();
    Ok(())
}
