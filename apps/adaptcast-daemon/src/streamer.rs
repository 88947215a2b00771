use std::{collections::BTreeSet, net::IpAddr, process::Stdio, sync::Arc, time::Duration};

use adaptcast_core::{StreamControl, StreamError};
use adaptcast_network::LossyLinesCodec;
use anyhow::{Context, Result};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::{
    io::AsyncRead,
    process::{Child, Command},
    sync::mpsc,
    time::Instant,
};
use tokio_util::{
    codec::FramedRead,
    sync::CancellationToken,
    task::TaskTracker,
};
use tracing::{debug, info, warn};

use crate::config::StreamConfig;

const STDERR_MAX_LINE: usize = 8 * 1024;

/// Receivers currently known to the transport.
#[derive(Debug, Default)]
struct ClientList(Mutex<BTreeSet<IpAddr>>);

impl ClientList {
    fn add(&self, address: IpAddr) {
        if self.0.lock().insert(address) {
            debug!("stream client added {address}");
        }
    }

    fn remove(&self, address: IpAddr) {
        if self.0.lock().remove(&address) {
            debug!("stream client removed {address}");
        }
    }

    fn list(&self) -> Vec<IpAddr> {
        self.0.lock().iter().copied().collect()
    }
}

/// Multicasts the input through an ffmpeg child process. A bitrate change
/// restarts the encoder at the media position the previous run reached.
pub struct FfmpegStreamer {
    clients: ClientList,
    bitrate_kbps: Mutex<u32>,
    commands: mpsc::UnboundedSender<u32>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl FfmpegStreamer {
    pub fn start(config: StreamConfig, initial_kbps: u32, shutdown: CancellationToken) -> Arc<Self> {
        let (commands, receiver) = mpsc::unbounded_channel();
        let tracker = TaskTracker::new();
        tracker.spawn(supervise(
            config,
            initial_kbps,
            receiver,
            shutdown.clone(),
            tracker.clone(),
        ));
        Arc::new(Self {
            clients: ClientList::default(),
            bitrate_kbps: Mutex::new(initial_kbps),
            commands,
            shutdown,
            tracker,
        })
    }

    /// Kills the encoder and waits for the supervisor and its log forwarders.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("stream stopped at {} kbps", *self.bitrate_kbps.lock());
    }
}

impl StreamControl for FfmpegStreamer {
    fn add_client(&self, address: IpAddr) {
        self.clients.add(address);
    }

    fn remove_client(&self, address: IpAddr) {
        self.clients.remove(address);
    }

    fn set_bitrate(&self, kbps: u32) -> Result<(), StreamError> {
        let mut current = self.bitrate_kbps.lock();
        if *current == kbps {
            return Ok(());
        }
        self.commands
            .send(kbps)
            .map_err(|_| StreamError::Stopped)?;
        *current = kbps;
        Ok(())
    }

    fn clients(&self) -> Vec<IpAddr> {
        self.clients.list()
    }
}

/// Dry-run transport: remembers the requested bitrate and logs it.
#[derive(Debug)]
pub struct LoggingStreamer {
    clients: ClientList,
    bitrate_kbps: Mutex<u32>,
}

impl LoggingStreamer {
    pub fn new(initial_kbps: u32) -> Self {
        info!("dry run: no encoder will be started, initial bitrate {initial_kbps} kbps");
        Self {
            clients: ClientList::default(),
            bitrate_kbps: Mutex::new(initial_kbps),
        }
    }
}

impl StreamControl for LoggingStreamer {
    fn add_client(&self, address: IpAddr) {
        self.clients.add(address);
    }

    fn remove_client(&self, address: IpAddr) {
        self.clients.remove(address);
    }

    fn set_bitrate(&self, kbps: u32) -> Result<(), StreamError> {
        let mut current = self.bitrate_kbps.lock();
        if *current != kbps {
            info!("dry run: bitrate {} -> {kbps} kbps", *current);
            *current = kbps;
        }
        Ok(())
    }

    fn clients(&self) -> Vec<IpAddr> {
        self.clients.list()
    }
}

enum Wake {
    Stop,
    Bitrate(u32),
    Exited,
}

async fn supervise(
    config: StreamConfig,
    mut kbps: u32,
    mut commands: mpsc::UnboundedReceiver<u32>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let mut offset = Duration::ZERO;
    loop {
        let started = Instant::now();
        let next = match spawn_encoder(&config, kbps, offset, &tracker) {
            Ok(mut child) => {
                let wake = tokio::select! {
                    _ = shutdown.cancelled() => Wake::Stop,
                    next = commands.recv() => next.map_or(Wake::Stop, Wake::Bitrate),
                    status = child.wait() => {
                        match status {
                            Ok(status) => info!("encoder exited: {status}"),
                            Err(err) => warn!("encoder wait failed: {err}"),
                        }
                        Wake::Exited
                    }
                };
                offset += started.elapsed();
                match wake {
                    Wake::Stop => {
                        kill(&mut child).await;
                        None
                    }
                    Wake::Bitrate(next) => {
                        kill(&mut child).await;
                        Some(next)
                    }
                    Wake::Exited => next_bitrate(&mut commands, &shutdown).await,
                }
            }
            Err(err) => {
                warn!("{err:#}");
                next_bitrate(&mut commands, &shutdown).await
            }
        };

        let Some(next) = next else {
            break;
        };
        info!(
            "restarting encoder {kbps} -> {next} kbps at offset {}s",
            offset.as_secs()
        );
        kbps = next;
    }
}

async fn next_bitrate(
    commands: &mut mpsc::UnboundedReceiver<u32>,
    shutdown: &CancellationToken,
) -> Option<u32> {
    tokio::select! {
        _ = shutdown.cancelled() => None,
        next = commands.recv() => next,
    }
}

async fn kill(child: &mut Child) {
    if let Err(err) = child.kill().await {
        debug!("encoder kill failed: {err}");
    }
}

fn spawn_encoder(
    config: &StreamConfig,
    kbps: u32,
    offset: Duration,
    tracker: &TaskTracker,
) -> Result<Child> {
    let mut cmd = Command::new(&config.ffmpeg_binary);
    cmd.args(encoder_args(config, kbps, offset))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().with_context(|| {
        format!("failed to spawn encoder binary '{}'", config.ffmpeg_binary)
    })?;
    info!(
        "encoder started at {kbps} kbps from {}s -> {}",
        offset.as_secs(),
        config.output_url
    );

    if let Some(stderr) = child.stderr.take() {
        tracker.spawn(forward_stderr(stderr));
    }
    Ok(child)
}

/// Logs encoder output until the pipe closes. Returns the number of lines.
async fn forward_stderr<R: AsyncRead + Unpin>(stderr: R) -> usize {
    let mut lines = FramedRead::new(stderr, LossyLinesCodec::new(STDERR_MAX_LINE));
    let mut forwarded = 0;
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                info!("ffmpeg: {line}");
                forwarded += 1;
            }
            Err(err) => {
                debug!("encoder stderr read failed: {err}");
                break;
            }
        }
    }
    forwarded
}

/// Arguments after the binary name. The seek offset has whole-second
/// resolution.
fn encoder_args(config: &StreamConfig, kbps: u32, offset: Duration) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-re".to_string(),
        "-ss".to_string(),
        offset.as_secs().to_string(),
        "-i".to_string(),
        config.input.to_string_lossy().into_owned(),
        "-target".to_string(),
        "ntsc-dvd".to_string(),
        "-b:v".to_string(),
        format!("{kbps}k"),
        "-f".to_string(),
        "mpegts".to_string(),
        config.output_url.clone(),
    ]
}
