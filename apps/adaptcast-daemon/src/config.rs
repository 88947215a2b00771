use std::{
    fs,
    path::{Path, PathBuf},
};

use adaptcast_media::ControllerConfig;
use adaptcast_network::DiscoveryConfig;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub ffmpeg_binary: String,
    pub input: PathBuf,
    pub output_url: String,
    /// Log bitrate changes instead of running an encoder.
    pub dry_run: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ffmpeg_binary: "ffmpeg".to_string(),
            input: PathBuf::from("video.mkv"),
            output_url: "udp://230.0.0.0:4446?pkt_size=1316".to_string(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub discovery: DiscoveryConfig,
    pub controller: ControllerConfig,
    pub stream: StreamConfig,
}

impl AppConfig {
    /// Reads a JSON config file; fields it leaves out keep their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let data = fs::read(path)
            .with_context(|| format!("read config file failed: {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("parse config file failed: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.discovery
            .validate()
            .context("invalid discovery config")?;
        self.controller
            .validate()
            .context("invalid controller config")?;
        if !self.stream.dry_run {
            if self.stream.ffmpeg_binary.trim().is_empty() {
                bail!("stream.ffmpeg_binary is empty");
            }
            if !self.stream.input.is_file() {
                bail!("input file not found: {}", self.stream.input.display());
            }
        }
        Ok(())
    }
}
