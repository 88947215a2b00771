use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use adaptcast_core::{ClientHandle, ClientRegistry, StreamControl, unix_ms};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt, stream};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time::{MissedTickBehavior, interval, sleep, timeout},
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
    task::TaskTracker,
};
use tracing::{debug, info, trace};

use crate::{DiscoveryConfig, LossyLinesCodec, NetworkError, parse_line};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    EndOfStream,
    ReadFailed,
    WriteFailed,
    Stale,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::EndOfStream => "end of stream",
            CloseReason::ReadFailed => "read failed",
            CloseReason::WriteFailed => "stats request failed",
            CloseReason::Stale => "connection no longer alive",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

#[derive(Debug)]
struct LiveConnection {
    id: u64,
    closed: CancellationToken,
}

/// Finds receivers on the configured address range and keeps one control
/// connection per receiver, feeding what they print into the registry.
#[derive(Clone)]
pub struct ProtocolMonitor {
    shared: Arc<Shared>,
}

struct Shared {
    config: DiscoveryConfig,
    addresses: Vec<IpAddr>,
    registry: ClientRegistry,
    stream: Arc<dyn StreamControl>,
    connections: DashMap<IpAddr, LiveConnection>,
    next_connection_id: AtomicU64,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl ProtocolMonitor {
    pub fn new(
        config: DiscoveryConfig,
        registry: ClientRegistry,
        stream: Arc<dyn StreamControl>,
        shutdown: CancellationToken,
    ) -> Result<Self, NetworkError> {
        config.validate()?;
        let addresses = config.addresses()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                addresses,
                registry,
                stream,
                connections: DashMap::new(),
                next_connection_id: AtomicU64::new(1),
                tracker: TaskTracker::new(),
                shutdown,
            }),
        })
    }

    /// Spawns the periodic scan. Returns immediately.
    pub fn start(&self) {
        let shared = self.shared.clone();
        info!(
            "monitor scanning {}{}-{} port={} every {}ms",
            shared.config.subnet_prefix,
            shared.config.start_host,
            shared.config.end_host,
            shared.config.port,
            shared.config.scan_interval_ms
        );
        self.shared.tracker.spawn(shared.scan_loop());
    }

    /// One discovery pass over every address without a live connection.
    /// Returns how many new connections were opened.
    pub async fn scan_once(&self) -> usize {
        self.shared.scan_once().await
    }

    pub fn live_connections(&self) -> Vec<IpAddr> {
        let mut addresses: Vec<_> = self
            .shared
            .connections
            .iter()
            .map(|entry| *entry.key())
            .collect();
        addresses.sort();
        addresses
    }

    /// Stops scanning, closes every connection and waits for all monitor
    /// tasks to exit. The registry holds none of this monitor's receivers
    /// afterwards.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;

        let leftovers: Vec<_> = self
            .shared
            .connections
            .iter()
            .map(|entry| (*entry.key(), entry.value().id))
            .collect();
        for (address, id) in leftovers {
            self.shared.teardown(address, id, CloseReason::Shutdown);
        }
        info!("monitor stopped");
    }
}

impl Shared {
    async fn scan_loop(self: Arc<Self>) {
        let pause = Duration::from_millis(self.config.scan_interval_ms);
        loop {
            let opened = self.scan_once().await;
            if opened > 0 {
                debug!("scan pass opened {opened} connection(s)");
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(pause) => {}
            }
        }
        debug!("scan loop stopped");
    }

    async fn scan_once(self: &Arc<Self>) -> usize {
        let candidates: Vec<_> = self
            .addresses
            .iter()
            .copied()
            .filter(|address| !self.is_live(*address))
            .collect();

        let port = self.config.port;
        let budget = Duration::from_millis(self.config.connect_timeout_ms);
        let attempts: Vec<_> = stream::iter(candidates)
            .map(move |address| async move { (address, try_connect(address, port, budget).await) })
            .buffer_unordered(self.config.max_concurrent_connects)
            .collect()
            .await;

        let mut opened = 0;
        for (address, socket) in attempts {
            if let Some(socket) = socket {
                if self.attach(address, socket) {
                    opened += 1;
                }
            }
        }
        opened
    }

    fn is_live(&self, address: IpAddr) -> bool {
        let stale_id = match self.connections.get(&address) {
            None => return false,
            Some(conn) if !conn.closed.is_cancelled() => return true,
            Some(conn) => conn.id,
        };
        self.teardown(address, stale_id, CloseReason::Stale);
        false
    }

    fn attach(self: &Arc<Self>, address: IpAddr, socket: TcpStream) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let (client, id, closed) = self.register(address);

        let (read_half, write_half) = socket.into_split();
        let lines = FramedRead::new(read_half, LossyLinesCodec::new(self.config.max_line_length));
        let commands = FramedWrite::new(write_half, LossyLinesCodec::new(self.config.max_line_length));

        self.tracker
            .spawn(self.clone().read_loop(client.clone(), id, lines, closed.clone()));
        self.tracker
            .spawn(self.clone().poll_loop(client, id, commands, closed));
        true
    }

    /// Records a new live connection in the connection table, the registry
    /// and the stream's client list.
    fn register(&self, address: IpAddr) -> (ClientHandle, u64, CancellationToken) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let closed = self.shutdown.child_token();
        self.connections.insert(
            address,
            LiveConnection {
                id,
                closed: closed.clone(),
            },
        );
        let client = self.registry.upsert(address, unix_ms());
        self.stream.add_client(address);
        info!("receiver connected: {address}");
        (client, id, closed)
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        self: Arc<Self>,
        client: ClientHandle,
        id: u64,
        mut lines: FramedRead<R, LossyLinesCodec>,
        closed: CancellationToken,
    ) -> CloseReason {
        let address = client.address();
        let reason = loop {
            tokio::select! {
                _ = closed.cancelled() => break self.cancel_reason(),
                next = lines.next() => match next {
                    Some(Ok(line)) => ingest(&client, &line),
                    Some(Err(err)) => {
                        debug!("[{address}] read failed: {err}");
                        break CloseReason::ReadFailed;
                    }
                    None => break CloseReason::EndOfStream,
                },
            }
        };
        self.teardown(address, id, reason);
        reason
    }

    async fn poll_loop<W: AsyncWrite + Unpin>(
        self: Arc<Self>,
        client: ClientHandle,
        id: u64,
        mut commands: FramedWrite<W, LossyLinesCodec>,
        closed: CancellationToken,
    ) -> CloseReason {
        let address = client.address();
        let mut ticker = interval(Duration::from_millis(self.config.stats_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls: u64 = 0;

        let reason = loop {
            tokio::select! {
                _ = closed.cancelled() => break self.cancel_reason(),
                _ = ticker.tick() => {
                    if client.take_updated() == Some(false) && polls > 0 {
                        debug!("[{address}] silent since last stats request");
                    }
                    if let Err(err) = commands.send(self.config.stats_command.as_str()).await {
                        debug!("[{address}] stats request failed: {err}");
                        break CloseReason::WriteFailed;
                    }
                    polls += 1;
                }
            }
        };
        self.teardown(address, id, reason);
        reason
    }

    fn cancel_reason(&self) -> CloseReason {
        if self.shutdown.is_cancelled() {
            CloseReason::Shutdown
        } else {
            CloseReason::Stale
        }
    }

    /// Idempotent. Only the connection with the matching id is dropped, so a
    /// late exit of an old connection cannot evict a newer one.
    fn teardown(&self, address: IpAddr, id: u64, reason: CloseReason) {
        let Some((_, conn)) = self.connections.remove_if(&address, |_, conn| conn.id == id) else {
            return;
        };
        conn.closed.cancel();
        self.registry.remove(address);
        self.stream.remove_client(address);
        info!("receiver removed: {address} ({reason})");
    }
}

fn ingest(client: &ClientHandle, line: &str) {
    debug!("[{}] {line}", client.address());
    let telemetry = parse_line(line);
    let now = unix_ms();
    client.update(|record| {
        record.mark_updated(now);
        if let Some(telemetry) = telemetry {
            telemetry.apply(record);
        }
    });
}

async fn try_connect(address: IpAddr, port: u16, budget: Duration) -> Option<TcpStream> {
    match timeout(budget, TcpStream::connect(SocketAddr::new(address, port))).await {
        Ok(Ok(socket)) => Some(socket),
        Ok(Err(err)) => {
            trace!("no receiver at {address}:{port}: {err}");
            None
        }
        Err(_) => {
            trace!("no receiver at {address}:{port}: connect timed out");
            None
        }
    }
}
