#![forbid(unsafe_code)]

mod config;
mod streamer;

use std::{path::PathBuf, sync::Arc};

use adaptcast_core::{ClientRegistry, StreamControl};
use adaptcast_media::AdaptiveController;
use adaptcast_network::ProtocolMonitor;
use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::AppConfig,
    streamer::{FfmpegStreamer, LoggingStreamer},
};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "adaptcast-daemon",
    version,
    about = "Multicast streamer that adapts its bitrate to receiver telemetry"
)]
struct Args {
    #[arg(long, help = "JSON config file; omitted fields keep their defaults")]
    config: Option<PathBuf>,

    #[arg(long, help = "Receiver subnet prefix, e.g. 10.0.30.")]
    subnet_prefix: Option<String>,

    #[arg(long, help = "First host number scanned")]
    start_host: Option<u8>,

    #[arg(long, help = "Last host number scanned")]
    end_host: Option<u8>,

    #[arg(long, help = "Receiver control port")]
    port: Option<u16>,

    #[arg(long, help = "Starting bitrate in kbps")]
    initial_bitrate: Option<u32>,

    #[arg(long, help = "Lowest bitrate in kbps")]
    min_bitrate: Option<u32>,

    #[arg(long, help = "Highest bitrate in kbps")]
    max_bitrate: Option<u32>,

    #[arg(long, help = "Bitrate step in kbps")]
    bitrate_step: Option<u32>,

    #[arg(long, help = "Decision iteration length in milliseconds")]
    iteration_ms: Option<u64>,

    #[arg(long, help = "Media file to stream")]
    input: Option<PathBuf>,

    #[arg(long, help = "Encoder output URL")]
    output_url: Option<String>,

    #[arg(long, help = "Encoder binary path")]
    ffmpeg_binary: Option<String>,

    #[arg(long, help = "Log bitrate changes without starting an encoder")]
    dry_run: bool,
}

impl Args {
    fn apply(self, config: &mut AppConfig) {
        let discovery = &mut config.discovery;
        if let Some(prefix) = self.subnet_prefix {
            discovery.subnet_prefix = prefix;
        }
        if let Some(host) = self.start_host {
            discovery.start_host = host;
        }
        if let Some(host) = self.end_host {
            discovery.end_host = host;
        }
        if let Some(port) = self.port {
            discovery.port = port;
        }

        let controller = &mut config.controller;
        if let Some(kbps) = self.initial_bitrate {
            controller.initial_bitrate_kbps = kbps;
        }
        if let Some(kbps) = self.min_bitrate {
            controller.limits.floor_kbps = kbps;
        }
        if let Some(kbps) = self.max_bitrate {
            controller.limits.ceil_kbps = kbps;
        }
        if let Some(kbps) = self.bitrate_step {
            controller.limits.step_kbps = kbps;
        }
        if let Some(ms) = self.iteration_ms {
            controller.iteration_ms = ms;
        }

        let stream = &mut config.stream;
        if let Some(input) = self.input {
            stream.input = input;
        }
        if let Some(url) = self.output_url {
            stream.output_url = url;
        }
        if let Some(binary) = self.ffmpeg_binary {
            stream.ffmpeg_binary = binary;
        }
        stream.dry_run |= self.dry_run;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let shutdown = CancellationToken::new();
    let registry = ClientRegistry::new();
    let initial_kbps = config.controller.initial_bitrate_kbps;

    let (stream, encoder): (Arc<dyn StreamControl>, Option<Arc<FfmpegStreamer>>) =
        if config.stream.dry_run {
            (Arc::new(LoggingStreamer::new(initial_kbps)), None)
        } else {
            let encoder =
                FfmpegStreamer::start(config.stream.clone(), initial_kbps, shutdown.child_token());
            (encoder.clone(), Some(encoder))
        };

    let monitor = ProtocolMonitor::new(
        config.discovery.clone(),
        registry.clone(),
        stream.clone(),
        shutdown.child_token(),
    )
    .context("start protocol monitor failed")?;
    let controller = AdaptiveController::new(config.controller.clone(), stream)
        .context("start adaptive controller failed")?;

    monitor.start();
    let controller_task = tokio::spawn(controller.run(registry.clone(), shutdown.child_token()));

    tokio::signal::ctrl_c()
        .await
        .context("listen for ctrl-c failed")?;
    info!("shutdown requested");

    shutdown.cancel();
    monitor.shutdown().await;
    controller_task.await.context("controller task failed")?;
    if let Some(encoder) = encoder {
        encoder.stop().await;
    }
    info!("daemon stopped, {} client(s) left in registry", registry.len());
    Ok(())
}
