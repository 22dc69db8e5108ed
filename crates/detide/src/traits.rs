use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::live::{Packet, Selection};
use crate::record::{DecodedRecord, OutputRecord};
use crate::registry::Stream;
use crate::tidal::TidalConfig;

/// Turns one raw record into samples tagged with their source.
pub trait RecordDecoder {
    fn decode(&self, raw: &[u8]) -> Result<DecodedRecord>;
}

/// Correction and encoding of a decoded record.
pub trait Transform {
    /// Apply the correction for `record` using the stream's state, passing every
    /// finished minute to `emit`. Returns the number of samples packed.
    fn apply(
        &mut self,
        record: &DecodedRecord,
        stream: &mut Stream,
        tidal: &TidalConfig,
        emit: &mut dyn FnMut(OutputRecord),
    ) -> Result<usize>;
}

/// Push-based streaming source (connect, subscribe, collect, checkpoint).
#[async_trait]
pub trait StreamClient: Send {
    /// Establish the connection, giving up once `cancel` fires. After a failure the
    /// next attempt inside `collect_next` waits for the reconnect delay.
    async fn connect(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Register the stream selection sent on every (re)connect
    async fn subscribe(&mut self, selection: &Selection) -> Result<()>;

    /// Block until the next packet, or return None once `cancel` fires
    async fn collect_next(&mut self, cancel: &CancellationToken) -> Option<Packet>;

    /// Persist the resumable position
    fn save_checkpoint(&self, path: &Path) -> Result<()>;

    /// Restore a position saved by `save_checkpoint`
    fn recover_checkpoint(&mut self, path: &Path) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}
