//! Per-connection Bolt proxying.
//!
//! Every accepted downstream connection gets its own upstream connection.
//! Each direction owns a buffer, drains complete frames out of it with the
//! stateless decoder and re-encodes them towards the peer. A decode error
//! ends the connection: the wire format cannot be resynchronized.

use crate::config::ListenerConfig;
use crate::error::ServerError;
use crate::stream::Downstream;
use boltmesh_protocol::{Command, Decoder, Encoder};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use uuid::Uuid;

const READ_BUFFER_SIZE: usize = 8192;

/// Counters shared by all connections of a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub frames_total: AtomicU64,
    pub errors_total: AtomicU64,
}

impl ListenerStats {
    pub fn active(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }
}

/// Which way a frame travels through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Downstream client to upstream server.
    Ingress,
    /// Upstream server back to the downstream client.
    Egress,
}

impl Direction {
    fn opposite(self) -> Self {
        match self {
            Direction::Ingress => Direction::Egress,
            Direction::Egress => Direction::Ingress,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ingress => f.write_str("ingress"),
            Direction::Egress => f.write_str("egress"),
        }
    }
}

/// How long a request sent with a zero timeout is remembered.
const UNBOUNDED_REQUEST_TTL: Duration = Duration::from_secs(300);

/// Minimum spacing between sweeps for expired requests.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Pending {
    started: Instant,
    expires: Instant,
}

#[derive(Debug)]
struct PendingTable {
    entries: HashMap<(Direction, u32), Pending>,
    last_sweep: Instant,
}

/// Requests awaiting a response on one connection, keyed by the direction
/// the request travelled and its request id.
///
/// A request is forgotten once its own timeout has passed, so peers that
/// never answer cannot grow the table without bound.
#[derive(Debug)]
pub struct InFlight {
    table: Mutex<PendingTable>,
}

impl Default for InFlight {
    fn default() -> Self {
        Self {
            table: Mutex::new(PendingTable {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }
}

/// What [`InFlight::observe`] learned from a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// A two-way request was registered.
    Registered,
    /// A one-way request; nothing to wait for.
    Oneway,
    /// A response matched its request after the given latency.
    Matched(Duration),
    /// A response with no outstanding request.
    Unmatched,
}

impl InFlight {
    pub fn observe(&self, direction: Direction, command: &Command) -> Correlation {
        let id = command.request_id();
        let now = Instant::now();
        let mut table = self.table.lock();
        match command {
            Command::Request(_) if command.is_oneway() => Correlation::Oneway,
            Command::Request(request) => {
                if now.duration_since(table.last_sweep) >= SWEEP_INTERVAL {
                    sweep(&mut table, now);
                }
                let ttl = match request.timeout {
                    0 => UNBOUNDED_REQUEST_TTL,
                    ms => Duration::from_millis(ms as u64),
                };
                table.entries.insert(
                    (direction, id),
                    Pending {
                        started: now,
                        expires: now + ttl,
                    },
                );
                Correlation::Registered
            }
            Command::Response(_) => match table.entries.remove(&(direction.opposite(), id)) {
                Some(pending) => Correlation::Matched(now.duration_since(pending.started)),
                None => Correlation::Unmatched,
            },
        }
    }

    /// Drops every request whose timeout passed before `now`. Returns how
    /// many were dropped.
    pub fn evict_expired(&self, now: Instant) -> usize {
        sweep(&mut self.table.lock(), now)
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sweep(table: &mut PendingTable, now: Instant) -> usize {
    let before = table.entries.len();
    table.entries.retain(|_, pending| pending.expires > now);
    table.last_sweep = now;
    let evicted = before - table.entries.len();
    if evicted > 0 {
        tracing::debug!("dropped {} expired in-flight request(s)", evicted);
    }
    evicted
}

/// Identity of one proxied connection, used in log lines.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub listener: String,
    pub peer: SocketAddr,
}

/// Last time a frame moved in either direction.
struct Activity(Mutex<Instant>);

impl Activity {
    fn touch(&self) {
        *self.0.lock() = Instant::now();
    }

    fn idle(&self) -> Duration {
        self.0.lock().elapsed()
    }
}

/// Proxies one downstream connection until both sides have closed, the
/// connection idles out, a frame fails to decode, or the listener stops.
pub async fn run(
    downstream: Downstream,
    info: ConnectionInfo,
    config: &ListenerConfig,
    stats: &ListenerStats,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let upstream = connect_upstream(config).await?;
    upstream.set_nodelay(true)?;
    tracing::debug!(
        "[{}] {} proxying {} -> {}{}",
        info.listener,
        info.id,
        info.peer,
        config.upstream_addr,
        if downstream.is_tls() { " (TLS)" } else { "" }
    );

    let (down_read, down_write) = tokio::io::split(downstream);
    let (up_read, up_write) = upstream.into_split();

    let decoder = Decoder::with_max_frame_size(config.max_frame_size);
    let in_flight = InFlight::default();
    let activity = Activity(Mutex::new(Instant::now()));
    let idle_timeout = config.idle_timeout();

    let pipe = Pipe {
        info: &info,
        decoder: &decoder,
        in_flight: &in_flight,
        activity: &activity,
        stats,
    };

    // A direction that reaches EOF half-closes its peer and finishes; the
    // other keeps running so replies to forwarded requests still arrive.
    let pumps = async {
        tokio::try_join!(
            pipe.pump(down_read, up_write, Direction::Ingress),
            pipe.pump(up_read, down_write, Direction::Egress),
        )
        .map(|_| ())
    };

    let result = tokio::select! {
        r = pumps => r,
        _ = watch_idle(&activity, idle_timeout) => {
            tracing::debug!("[{}] {} idle timeout", info.listener, info.id);
            Ok(())
        }
        _ = shutdown.recv() => Err(ServerError::ShuttingDown),
    };

    if !in_flight.is_empty() {
        tracing::debug!(
            "[{}] {} closing with {} request(s) in flight",
            info.listener,
            info.id,
            in_flight.len()
        );
    }
    result
}

async fn connect_upstream(config: &ListenerConfig) -> Result<TcpStream, ServerError> {
    let addr = config.upstream_addr;
    match tokio::time::timeout(config.connect_timeout(), TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ServerError::Upstream {
            addr,
            reason: e.to_string(),
        }),
        Err(_) => Err(ServerError::Upstream {
            addr,
            reason: "connect timed out".to_string(),
        }),
    }
}

async fn watch_idle(activity: &Activity, timeout: Duration) {
    loop {
        let idle = activity.idle();
        if idle >= timeout {
            return;
        }
        tokio::time::sleep(timeout - idle).await;
    }
}

struct Pipe<'a> {
    info: &'a ConnectionInfo,
    decoder: &'a Decoder,
    in_flight: &'a InFlight,
    activity: &'a Activity,
    stats: &'a ListenerStats,
}

impl Pipe<'_> {
    async fn pump<R, W>(&self, mut reader: R, mut writer: W, direction: Direction) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        loop {
            let n = reader.read_buf(&mut buf).await?;
            if n == 0 {
                if !buf.is_empty() {
                    tracing::debug!(
                        "[{}] {} {} closed with {} undecoded bytes",
                        self.info.listener,
                        self.info.id,
                        direction,
                        buf.len()
                    );
                }
                let _ = writer.shutdown().await;
                return Ok(());
            }
            self.activity.touch();

            while let Some(command) = self.decoder.decode_buf(&mut buf).map_err(|e| {
                tracing::warn!(
                    "[{}] {} {} decode failed: {}",
                    self.info.listener,
                    self.info.id,
                    direction,
                    e
                );
                e
            })? {
                self.forward(&mut writer, direction, command).await?;
            }
        }
    }

    async fn forward<W>(&self, writer: &mut W, direction: Direction, command: Command) -> Result<(), ServerError>
    where
        W: AsyncWrite + Unpin,
    {
        let id = command.request_id();
        match self.in_flight.observe(direction, &command) {
            Correlation::Matched(latency) => tracing::debug!(
                "[{}] {} {} response id={} after {:?}",
                self.info.listener,
                self.info.id,
                direction,
                id,
                latency
            ),
            Correlation::Unmatched => tracing::warn!(
                "[{}] {} {} response id={} has no pending request",
                self.info.listener,
                self.info.id,
                direction,
                id
            ),
            Correlation::Registered | Correlation::Oneway => tracing::trace!(
                "[{}] {} {} request id={} ({} bytes content)",
                self.info.listener,
                self.info.id,
                direction,
                id,
                command.common().content_len()
            ),
        }

        let frame = Encoder::encode_command(&command)?;
        self.stats.frames_total.fetch_add(1, Ordering::Relaxed);
        writer.write_all(&frame).await?;
        Ok(())
    }
}
