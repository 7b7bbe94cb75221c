use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use sparkify_lake::config::{CliConfig, EtlConfig, FileConfig};
use sparkify_lake::observability::{LogFormat, init_logging};
use sparkify_lake::pipeline::run_with_report;
use sparkify_lake::report::RunReport;

#[derive(Parser, Debug)]
#[command(name = "sparkify-lake", about = "Build a song-play star schema from catalog and event logs")]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Song catalog location: file, directory, or glob pattern.
    #[clap(long)]
    pub song_data: Option<String>,

    /// Event log location: file, directory, or glob pattern.
    #[clap(long)]
    pub log_data: Option<String>,

    /// Root directory for the output tables.
    #[clap(long)]
    pub output: Option<PathBuf>,

    /// Max fraction of malformed records tolerated per source.
    #[clap(long)]
    pub max_drop_rate: Option<f64>,

    /// Max difference in seconds between a play's length and the catalog duration.
    #[clap(long)]
    pub duration_tolerance: Option<f64>,

    /// Worker thread count. Defaults to the number of CPUs.
    #[clap(long)]
    pub workers: Option<usize>,

    #[clap(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Write the run report as JSON to this path.
    #[clap(long)]
    pub report: Option<PathBuf>,
}

impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            song_data: args.song_data.clone(),
            log_data: args.log_data.clone(),
            output: args.output.clone(),
            max_drop_rate: args.max_drop_rate,
            duration_tolerance: args.duration_tolerance,
            workers: args.workers,
        }
    }
}

fn resolve_config(args: &CliArgs) -> Result<EtlConfig> {
    let file_config = match &args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    EtlConfig::resolve(&CliConfig::from(args), file_config)
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_logging(args.log_format);

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e:#}");
            return ExitCode::from(2);
        }
    };
    info!(
        song_data = %config.song_data,
        log_data = %config.log_data,
        output = %config.output.display(),
        workers = config.workers,
        "starting run"
    );

    let mut report = RunReport::default();
    let result = run_with_report(&config, &mut report);
    report.print();
    if let Some(path) = &args.report
        && let Err(e) = report.save_to_file(path)
    {
        error!("failed to save report: {e:#}");
    }

    match result {
        Ok(()) => {
            info!(elapsed_ms = report.elapsed_ms as u64, "run complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("run failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
