//! `multilateration` CLI: locate transmitters from per-sniffer captures.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use multilateration::{
    ConfigurationManager, GeolocationPipeline, JsonWriter, SourceConfig, SourceFormat, Technology,
};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "multilateration", about = "RSSI multilateration over sniffer captures")]
struct Cli {
    /// JSON configuration with system parameters, sniffers and sources
    #[arg(long)]
    config: Option<PathBuf>,
    /// Calibration preset: bluetooth (ble) or wifi (wlan)
    #[arg(long)]
    technology: Option<Technology>,
    /// Override the path-loss exponent
    #[arg(long)]
    path_loss_exponent: Option<f64>,
    /// Capture source as SNIFFER_ID=PATH; replaces sources from the config file
    #[arg(long = "source", value_name = "ID=PATH", value_parser = parse_source)]
    sources: Vec<(String, PathBuf)>,
    /// Container format of every --source
    #[arg(long, value_enum, default_value_t = InputFormat::Normalized)]
    format: InputFormat,
    /// Where to write the JSON array of [x, y] positions
    #[arg(long, default_value = "positions.json")]
    output: PathBuf,
    /// Also write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
    /// Pretty print JSON output
    #[arg(long)]
    pretty: bool,
    /// Solve observation sets on a single thread
    #[arg(long)]
    sequential: bool,
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    Normalized,
    TsharkJson,
    TsharkCapture,
    TsharkWlanJson,
    TsharkWlanCapture,
}

impl From<InputFormat> for SourceFormat {
    fn from(format: InputFormat) -> Self {
        match format {
            InputFormat::Normalized => SourceFormat::Normalized,
            InputFormat::TsharkJson => SourceFormat::TsharkJson,
            InputFormat::TsharkCapture => SourceFormat::TsharkCapture,
            InputFormat::TsharkWlanJson => SourceFormat::TsharkWlanJson,
            InputFormat::TsharkWlanCapture => SourceFormat::TsharkWlanCapture,
        }
    }
}

fn parse_source(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((id, path)) if !id.is_empty() && !path.is_empty() => Ok((id.to_string(), PathBuf::from(path))),
        _ => Err(format!("expected SNIFFER_ID=PATH, got '{}'", arg)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigurationManager::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ConfigurationManager::new(),
    };

    init_logging(cli.verbose || config.get_system_config().verbose);

    apply_overrides(&cli, &mut config)?;

    let geometry = config.validate_system_geometry();
    for warning in &geometry.warnings {
        warn!("{}", warning);
    }
    if config.sources().is_empty() {
        bail!("no capture sources configured; pass --source ID=PATH or list sources in --config");
    }

    let system = config.get_system_config();
    info!(
        technology = %system.technology,
        sniffers = config.sniffers().len(),
        sources = config.sources().len(),
        "starting run"
    );

    let pipeline = GeolocationPipeline::from_config(&config)?;
    let output = pipeline.run(config.sources())?;

    let writer = if cli.pretty { JsonWriter::pretty() } else { JsonWriter::new() };
    writer.write_positions(&cli.output, &output.positions)?;
    if let Some(path) = &cli.report {
        writer.write_report(path, &output.report)?;
    }

    println!("{}", output.report);
    Ok(())
}

fn apply_overrides(cli: &Cli, config: &mut ConfigurationManager) -> Result<()> {
    if let Some(technology) = cli.technology {
        config.set_technology(technology);
    }
    if let Some(exponent) = cli.path_loss_exponent {
        config.set_path_loss_exponent(exponent)?;
    }
    if cli.sequential {
        config.set_parallel(false);
    }

    if !cli.sources.is_empty() {
        config.clear_sources();
        for (sniffer_id, path) in &cli.sources {
            config.add_source(SourceConfig {
                sniffer_id: sniffer_id.clone(),
                path: path.clone(),
                format: cli.format.into(),
            })?;
        }
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_writer(std::io::stderr);

    if verbose {
        subscriber.with_max_level(tracing::Level::DEBUG).init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber.with_max_level(tracing::Level::INFO).init();
    }
}
