use clap::Parser;
use log::{error, info};
use std::process::ExitCode;

use voc2yolo::{run_conversion, Args, BatchOptions};

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mapping = match args.class_mapping() {
        Ok(mapping) => mapping,
        Err(e) => {
            error!("Invalid class configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    info!(
        "Starting the conversion process with {} class mapping(s)...",
        mapping.len()
    );

    match run_conversion(&args.input, &mapping, &BatchOptions::from(&args)) {
        Ok(stats) => {
            stats.print_summary(&mapping);
            if stats.has_failures() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("Conversion aborted: {}", e);
            ExitCode::from(2)
        }
    }
}
