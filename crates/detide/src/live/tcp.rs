//! Line-delimited JSON streaming client over TCP.
//!
//! On every (re)connect the client sends one `select` command per station
//! (carrying the last collected sequence as `resume`) followed by `start`.
//! The server then pushes packets, one JSON object per line:
//! `{"kind":"data","seq":12,"station":"NZ_TGA","record":{...}}`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{DetideError, Result};
use crate::live::checkpoint::Checkpoint;
use crate::live::selection::Selection;
use crate::live::{Packet, PacketKind};
use crate::traits::StreamClient;

/// Port used when the server address omits one.
pub const DEFAULT_PORT: u16 = 18000;

/// Idle deadline used when neither timeout nor heartbeat is set.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct TcpClientConfig {
    /// `host:port`; an empty host means localhost, a missing port means [`DEFAULT_PORT`].
    pub address: String,
    /// Wait before reconnecting.
    pub delay: Duration,
    /// Reconnect when nothing arrives for this long; zero disables.
    pub timeout: Duration,
    /// Send a ping when idle for this long; zero disables.
    pub heartbeat: Duration,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self {
            address: format!(":{}", DEFAULT_PORT),
            delay: Duration::from_secs(30),
            timeout: Duration::from_secs(600),
            heartbeat: Duration::ZERO,
        }
    }
}

/// Resolve `:18000`, `host` and `host:port` forms to `host:port`.
pub fn normalize_address(address: &str) -> String {
    let address = address.trim();
    match address.rsplit_once(':') {
        Some(("", port)) => format!("localhost:{}", port),
        Some(_) => address.to_string(),
        None if address.is_empty() => format!("localhost:{}", DEFAULT_PORT),
        None => format!("{}:{}", address, DEFAULT_PORT),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WireKind {
    Data,
    Info,
    Keepalive,
}

#[derive(Debug, Deserialize)]
struct WirePacket {
    kind: WireKind,
    #[serde(default)]
    seq: u64,
    #[serde(default)]
    station: String,
    #[serde(default)]
    record: Option<serde_json::Value>,
}

struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    last_recv: Instant,
    last_send: Instant,
}

impl Connection {
    async fn send(&mut self, command: &serde_json::Value) -> std::io::Result<()> {
        let mut line = command.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.last_send = Instant::now();
        Ok(())
    }

    /// Next instant the read timeout or heartbeat needs attention.
    fn deadline(&self, config: &TcpClientConfig) -> Instant {
        let mut deadline = Instant::now() + IDLE_WAIT;
        if !config.timeout.is_zero() {
            deadline = deadline.min(self.last_recv + config.timeout);
        }
        if !config.heartbeat.is_zero() {
            deadline = deadline.min(self.last_send + config.heartbeat);
        }
        deadline
    }
}

enum Event {
    Cancelled,
    Line(std::io::Result<Option<String>>),
    Deadline,
}

pub struct TcpStreamClient {
    config: TcpClientConfig,
    address: String,
    selection: Option<Selection>,
    positions: BTreeMap<String, u64>,
    conn: Option<Connection>,
    /// Earliest time the next connect attempt may start.
    retry_at: Option<Instant>,
}

impl TcpStreamClient {
    pub fn new(config: TcpClientConfig) -> Self {
        let address = normalize_address(&config.address);
        Self {
            config,
            address,
            selection: None,
            positions: BTreeMap::new(),
            conn: None,
            retry_at: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Last collected sequence per station.
    pub fn positions(&self) -> &BTreeMap<String, u64> {
        &self.positions
    }

    async fn connect_stream(&self) -> Result<TcpStream> {
        let connect = TcpStream::connect(&self.address);
        let result = if self.config.timeout.is_zero() {
            connect.await
        } else {
            tokio::time::timeout(self.config.timeout, connect)
                .await
                .map_err(|_| DetideError::Connection(format!("{}: connect timed out", self.address)))?
        };
        result.map_err(|e| DetideError::Connection(format!("{}: {}", self.address, e)))
    }

    /// Connect and send the handshake, abandoning either step once `cancel` fires.
    async fn open(&mut self, cancel: &CancellationToken) -> Result<()> {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DetideError::Connection(format!("{}: connect cancelled", self.address)));
            }
            result = self.connect_stream() => result?,
        };

        let (read, writer) = stream.into_split();
        let now = Instant::now();
        let mut conn = Connection {
            lines: BufReader::new(read).lines(),
            writer,
            last_recv: now,
            last_send: now,
        };

        let commands = self.handshake();
        let handshake = async {
            for command in &commands {
                debug!(cmd = %command, "Sending command");
                conn.send(command).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DetideError::Connection(format!("{}: handshake cancelled", self.address)));
            }
            result = handshake => {
                result.map_err(|e| DetideError::Connection(format!("{}: {}", self.address, e)))?
            }
        }

        info!(address = %self.address, "Connected");
        self.conn = Some(conn);
        self.retry_at = None;
        Ok(())
    }

    fn handshake(&self) -> Vec<serde_json::Value> {
        let mut commands = Vec::new();
        match &self.selection {
            Some(Selection::Multi(stations)) => {
                for s in stations {
                    commands.push(serde_json::json!({
                        "op": "select",
                        "network": s.network,
                        "station": s.station,
                        "selectors": s.selectors,
                        "resume": self.positions.get(&s.key()),
                    }));
                }
            }
            Some(Selection::Uni { selectors }) => {
                commands.push(serde_json::json!({
                    "op": "select",
                    "selectors": selectors,
                    "resume": self.positions.values().max(),
                }));
            }
            None => {}
        }
        commands.push(serde_json::json!({ "op": "start" }));
        commands
    }

    /// Drop the connection; the next attempt waits out the reconnect delay.
    fn schedule_retry(&mut self) {
        self.conn = None;
        self.retry_at = Some(Instant::now() + self.config.delay);
        info!(delay_secs = self.config.delay.as_secs(), "Reconnecting after delay");
    }

    /// Sleep until a scheduled retry is due. False when cancelled meanwhile.
    async fn wait_for_retry(&mut self, cancel: &CancellationToken) -> bool {
        let Some(at) = self.retry_at else {
            return true;
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep_until(at) => {
                self.retry_at = None;
                true
            }
        }
    }

    fn parse_line(&mut self, line: &str) -> Option<Packet> {
        let wire: WirePacket = match serde_json::from_str(line) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(error = %e, "Malformed packet");
                return None;
            }
        };

        let kind = match wire.kind {
            WireKind::Data => PacketKind::Data,
            WireKind::Info => PacketKind::Info,
            WireKind::Keepalive => PacketKind::Keepalive,
        };
        if kind == PacketKind::Data {
            self.positions.insert(wire.station.clone(), wire.seq);
        }

        Some(Packet {
            kind,
            seq: wire.seq,
            station: wire.station,
            payload: wire.record.map(|r| r.to_string().into_bytes()).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl StreamClient for TcpStreamClient {
    async fn connect(&mut self, cancel: &CancellationToken) -> Result<()> {
        let result = self.open(cancel).await;
        if result.is_err() && !cancel.is_cancelled() {
            self.schedule_retry();
        }
        result
    }

    /// Takes effect on the next (re)connect.
    async fn subscribe(&mut self, selection: &Selection) -> Result<()> {
        self.selection = Some(selection.clone());
        Ok(())
    }

    async fn collect_next(&mut self, cancel: &CancellationToken) -> Option<Packet> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            if self.conn.is_none() {
                if !self.wait_for_retry(cancel).await {
                    return None;
                }
                if let Err(e) = self.open(cancel).await {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    warn!(error = %e, "Connect failed");
                    self.schedule_retry();
                    continue;
                }
            }

            let event = {
                let Some(conn) = self.conn.as_mut() else { continue };
                let deadline = conn.deadline(&self.config);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Event::Cancelled,
                    line = conn.lines.next_line() => Event::Line(line),
                    _ = tokio::time::sleep_until(deadline) => Event::Deadline,
                }
            };

            match event {
                Event::Cancelled => return None,
                Event::Line(Ok(Some(line))) => {
                    if let Some(conn) = self.conn.as_mut() {
                        conn.last_recv = Instant::now();
                    }
                    if line.trim().is_empty() {
                        continue;
                    }
                    trace!(bytes = line.len(), "Packet received");
                    if let Some(packet) = self.parse_line(&line) {
                        return Some(packet);
                    }
                }
                Event::Line(Ok(None)) => {
                    warn!(address = %self.address, "Server closed connection");
                    self.schedule_retry();
                }
                Event::Line(Err(e)) => {
                    warn!(address = %self.address, error = %e, "Read failed");
                    self.schedule_retry();
                }
                Event::Deadline => {
                    let Some(conn) = self.conn.as_mut() else { continue };
                    let now = Instant::now();
                    if !self.config.timeout.is_zero() && now >= conn.last_recv + self.config.timeout {
                        warn!(timeout_secs = self.config.timeout.as_secs(), "Read timeout");
                        self.schedule_retry();
                    } else if !self.config.heartbeat.is_zero()
                        && now >= conn.last_send + self.config.heartbeat
                    {
                        trace!("Sending heartbeat");
                        if let Err(e) = conn.send(&serde_json::json!({ "op": "ping" })).await {
                            warn!(error = %e, "Heartbeat failed");
                            self.schedule_retry();
                        }
                    }
                }
            }
        }
    }

    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        Checkpoint {
            positions: self.positions.clone(),
        }
        .save(path)
    }

    fn recover_checkpoint(&mut self, path: &Path) -> Result<()> {
        let checkpoint = Checkpoint::load(path)?;
        self.positions = checkpoint.positions;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            conn.writer.shutdown().await?;
            info!(address = %self.address, "Disconnected");
        }
        Ok(())
    }
}
