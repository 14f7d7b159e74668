use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use ahle_engine::config::{OutputFormat, PipelineConfig};
use ahle_engine::pipeline;

#[derive(Parser, Debug)]
#[clap(
    name = "ahle",
    version,
    about = "Animal Health Loss Envelope: counterfactual losses, roll-ups and cause attribution."
)]
struct Args {
    /// Pipeline configuration (TOML).
    #[clap(long, short, value_name = "CONFIG")]
    config: PathBuf,

    /// Override the configured output directory.
    #[clap(long)]
    output_dir: Option<PathBuf>,

    /// Write Parquet instead of the configured format.
    #[clap(long)]
    parquet: bool,

    /// Exit non-zero when any diagnostic of severity error was raised.
    #[clap(long)]
    strict: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode, ahle_engine::AhleError> {
    let config = PipelineConfig::load(&args.config)?;
    let output_dir = args.output_dir.clone().unwrap_or_else(|| config.output_dir.clone());
    let format = if args.parquet { OutputFormat::Parquet } else { config.format };

    let mut report = pipeline::run(&config)?;
    let written = report.write_outputs(&output_dir, format)?;
    for path in &written {
        println!("{}", path.display());
    }

    let errors = report.diagnostics.errors().count();
    if !report.failed_partitions.is_empty() {
        log::warn!("{} attribution partitions failed", report.failed_partitions.len());
    }
    if args.strict && errors > 0 {
        log::error!("{errors} error diagnostics raised");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
