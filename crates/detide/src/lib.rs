//! detide: tidal correction of tide-gauge telemetry
//!
//! Shared core for the batch (`msdetide`) and live (`sldetide`) front ends:
//! per-source stream registry, FIR decimation chains, record dispatch,
//! minute-bucketed output and live checkpointing.

pub mod batch;
pub mod cli;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod live;
pub mod logging;
pub mod record;
pub mod registry;
pub mod tidal;
pub mod traits;
pub mod transform;
pub mod writer;

pub use batch::{BatchSummary, FileBatchReader};
pub use cli::CommonArgs;
pub use dispatcher::Dispatcher;
pub use error::{DetideError, Result};
pub use filter::{FilterCatalog, FilterDefinition, ResolvedChain};
pub use live::{CheckpointManager, LiveRunner, LiveSummary, Packet, PacketKind, Selection};
pub use record::{DecodedRecord, JsonRecordDecoder, MinuteStamp, OutputRecord};
pub use registry::{Stream, StreamDefaults, StreamRegistry};
pub use tidal::{Constituent, TidalConfig};
pub use traits::{RecordDecoder, StreamClient, Transform};
pub use transform::HarmonicTransform;
pub use writer::OutputWriter;
