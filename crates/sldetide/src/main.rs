//! sldetide: live tidal correction of streamed sensor packets
//!
//! Subscribes to a streaming server, corrects every data packet and writes
//! the result to GTS minute files, or to stdout when no directory is given.
//! Progress is checkpointed so a restart resumes where it left off.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use detide::live::{
    CheckpointManager, LiveRunner, Selection, TcpClientConfig, TcpStreamClient, DEFAULT_SELECTORS,
};
use detide::{CommonArgs, OutputWriter};

/// Calibration gain when `-B` is not given.
const DEFAULT_BETA: f64 = 1.0;

#[derive(Parser, Debug)]
#[command(name = "sldetide", version)]
#[command(about = "Live tidal correction of streamed sensor packets")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Seconds to wait before reconnecting
    #[arg(short = 'd', long, default_value_t = 30)]
    delay: u64,

    /// Seconds without data before reconnecting (0 disables)
    #[arg(short = 't', long, default_value_t = 600)]
    timeout: u64,

    /// Seconds between heartbeats on an idle link (0 disables)
    #[arg(short = 'k', long, default_value_t = 0)]
    heartbeat: u64,

    /// File listing streams, one `NET STA [selectors]` per line
    #[arg(short = 'l', long)]
    streamlist: Option<PathBuf>,

    /// Streams as NET_STA[:selectors],...
    #[arg(short = 'S', long)]
    streams: Option<String>,

    /// Default selectors
    #[arg(short = 's', long, default_value = DEFAULT_SELECTORS)]
    selectors: String,

    /// Checkpoint file for resuming
    #[arg(short = 'x', long)]
    statefile: Option<PathBuf>,

    /// Packets between checkpoint saves (0 saves only on exit)
    #[arg(short = 'u', long, default_value_t = 300)]
    update: u32,

    /// Streaming server as [host]:port
    #[arg(env = "SEEDLINK_SERVER", default_value = ":18000")]
    server: String,

    /// Output directory; overrides -G
    gts_dir: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    detide::logging::init_logging(args.common.verbose);

    match run(args).instrument(info_span!("sldetide")).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _enter = info_span!("sldetide").entered();
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting sldetide");
    args.common.log_config(DEFAULT_BETA);

    let selection = Selection::from_options(
        args.streamlist.as_deref(),
        args.streams.as_deref(),
        &args.selectors,
    )
    .context("invalid stream selection")?;
    debug!(?selection, "Stream selection");

    let output_dir = args.gts_dir.clone().or_else(|| args.common.gts.clone());
    let dispatcher = args
        .common
        .build_dispatcher(DEFAULT_BETA, OutputWriter::from_option(output_dir))
        .context("invalid configuration")?;

    let client = TcpStreamClient::new(TcpClientConfig {
        address: args.server.clone(),
        delay: Duration::from_secs(args.delay),
        timeout: Duration::from_secs(args.timeout),
        heartbeat: Duration::from_secs(args.heartbeat),
    });
    info!(server = %client.address(), "Streaming server");

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;

    let checkpoint = CheckpointManager::new(args.statefile.clone(), args.update);
    let mut runner = LiveRunner::new(client, dispatcher, checkpoint);
    let summary = runner
        .run(&selection, shutdown)
        .await
        .context("live processing aborted")?;

    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        dropped = summary.dropped,
        packed = summary.packed,
        checkpoints = runner.checkpoint().saves(),
        "Finished"
    );
    Ok(())
}

/// Cancel on SIGINT, SIGQUIT or SIGTERM. SIGHUP and SIGALRM are absorbed.
fn spawn_signal_handler(shutdown: CancellationToken) -> anyhow::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigalrm = signal(SignalKind::alarm())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigint.recv() => break,
                _ = sigquit.recv() => break,
                _ = sigterm.recv() => break,
                _ = sighup.recv() => debug!("Ignoring SIGHUP"),
                _ = sigalrm.recv() => debug!("Ignoring SIGALRM"),
            }
        }
        info!("Received shutdown signal");
        shutdown.cancel();
    });
    Ok(())
}
