//! Live ingestion: a long-running subscription feeding the dispatcher.

pub mod checkpoint;
pub mod selection;
pub mod tcp;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{DetideError, Result};
use crate::traits::StreamClient;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use selection::{Selection, StationSelector, DEFAULT_SELECTORS};
pub use tcp::{TcpClientConfig, TcpStreamClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Data,
    Info,
    Keepalive,
}

/// One packet collected from the streaming source.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    pub seq: u64,
    /// `NET_STA` the packet belongs to.
    pub station: String,
    /// Raw record bytes for data packets.
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn data(station: impl Into<String>, seq: u64, payload: Vec<u8>) -> Self {
        Self {
            kind: PacketKind::Data,
            seq,
            station: station.into(),
            payload,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LiveSummary {
    pub processed: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub packed: u64,
}

/// Drives a [`StreamClient`] until cancellation, dispatching data packets
/// and checkpointing progress.
pub struct LiveRunner<C: StreamClient> {
    client: C,
    dispatcher: Dispatcher,
    checkpoint: CheckpointManager,
}

impl<C: StreamClient> LiveRunner<C> {
    pub fn new(client: C, dispatcher: Dispatcher, checkpoint: CheckpointManager) -> Self {
        Self {
            client,
            dispatcher,
            checkpoint,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn checkpoint(&self) -> &CheckpointManager {
        &self.checkpoint
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Run the collection loop until `shutdown` is cancelled, the source ends,
    /// or a transform fails. Only fatal errors are returned.
    pub async fn run(&mut self, selection: &Selection, shutdown: CancellationToken) -> Result<LiveSummary> {
        if let Some(path) = self.checkpoint.path() {
            match self.client.recover_checkpoint(path) {
                Ok(()) => info!(path = %path.display(), "Recovered checkpoint"),
                Err(e) => warn!(path = %path.display(), error = %e, "unable to recover statefile"),
            }
        }

        self.client.subscribe(selection).await?;
        if let Err(e) = self.client.connect(&shutdown).await {
            if !shutdown.is_cancelled() {
                warn!(error = %e, "Initial connect failed, will retry");
            }
        }

        let mut summary = LiveSummary::default();
        let mut fatal = None;

        while let Some(packet) = self.client.collect_next(&shutdown).await {
            if packet.kind != PacketKind::Data {
                trace!(kind = ?packet.kind, seq = packet.seq, "Skipping packet");
                summary.skipped += 1;
                continue;
            }

            match self.dispatcher.dispatch(&packet.payload) {
                Ok(packed) => {
                    summary.processed += 1;
                    summary.packed += packed as u64;
                }
                Err(e) if e.is_fatal() => {
                    fatal = Some(e);
                    break;
                }
                Err(e @ DetideError::Decode(_)) => {
                    warn!(station = %packet.station, seq = packet.seq, error = %e, "error parsing record");
                    summary.dropped += 1;
                    continue;
                }
                Err(e) => {
                    error!(station = %packet.station, seq = packet.seq, error = %e, "error processing block");
                    break;
                }
            }

            self.checkpoint.packet_processed(&self.client);
        }

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            dropped = summary.dropped,
            "stopping"
        );

        if fatal.is_none() {
            self.checkpoint.finish(&self.client);
        }
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "Disconnect failed");
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}
