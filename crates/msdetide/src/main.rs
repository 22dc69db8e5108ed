//! msdetide: batch tidal correction of recorded sensor blocks
//!
//! Reads newline-framed records from each file argument (or stdin when
//! none are given) and writes corrected samples to GTS minute files.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, info_span};

use detide::{CommonArgs, FileBatchReader, OutputWriter};

/// Calibration gain when `-B` is not given.
const DEFAULT_BETA: f64 = 10.0;

#[derive(Parser, Debug)]
#[command(name = "msdetide", version)]
#[command(about = "Batch tidal correction of recorded sensor blocks")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Input files; `-` or none reads standard input
    files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    detide::logging::init_logging(args.common.verbose);

    let span = info_span!("msdetide");
    let _enter = span.enter();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting msdetide");
    args.common.log_config(DEFAULT_BETA);

    let output_dir = args.common.gts.clone().unwrap_or_else(|| PathBuf::from("."));
    let mut dispatcher = args
        .common
        .build_dispatcher(DEFAULT_BETA, OutputWriter::directory(&output_dir))
        .context("invalid configuration")?;

    let reader = FileBatchReader::new(args.files);
    let summary = reader.run(&mut dispatcher).context("batch aborted")?;

    info!(
        locations = summary.locations,
        records = summary.records,
        packed = summary.packed,
        aborted = summary.aborted,
        streams = dispatcher.registry().len(),
        "Finished"
    );
    Ok(())
}
