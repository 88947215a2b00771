#![forbid(unsafe_code)]

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod codec;
mod monitor;
mod protocol;

pub use codec::LossyLinesCodec;
pub use monitor::{CloseReason, ProtocolMonitor};
pub use protocol::{TelemetryLine, extract_number, parse_line};

pub const DEFAULT_CONTROL_PORT: u16 = 5050;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub subnet_prefix: String,
    pub start_host: u8,
    pub end_host: u8,
    pub port: u16,
    pub scan_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_concurrent_connects: usize,
    pub stats_interval_ms: u64,
    pub stats_command: String,
    pub max_line_length: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            subnet_prefix: "10.0.30.".to_string(),
            start_host: 1,
            end_host: 50,
            port: DEFAULT_CONTROL_PORT,
            scan_interval_ms: 5_000,
            connect_timeout_ms: 150,
            max_concurrent_connects: 16,
            stats_interval_ms: 5_000,
            stats_command: "stats".to_string(),
            max_line_length: 4_096,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("host range {start}-{end} is empty")]
    EmptyHostRange { start: u8, end: u8 },
    #[error("'{0}' is not a valid receiver address")]
    InvalidAddress(String),
    #[error("{0} must be greater than zero")]
    ZeroSetting(&'static str),
    #[error("stats command must be a single non-empty line")]
    InvalidStatsCommand,
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<(), NetworkError> {
        for (name, value) in [
            ("scan_interval_ms", self.scan_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("stats_interval_ms", self.stats_interval_ms),
            ("max_concurrent_connects", self.max_concurrent_connects as u64),
            ("max_line_length", self.max_line_length as u64),
        ] {
            if value == 0 {
                return Err(NetworkError::ZeroSetting(name));
            }
        }
        if self.stats_command.trim().is_empty() || self.stats_command.contains('\n') {
            return Err(NetworkError::InvalidStatsCommand);
        }
        self.addresses().map(|_| ())
    }

    /// Every address the scan probes, `prefix + host` for each host in range.
    pub fn addresses(&self) -> Result<Vec<IpAddr>, NetworkError> {
        if self.start_host > self.end_host {
            return Err(NetworkError::EmptyHostRange {
                start: self.start_host,
                end: self.end_host,
            });
        }
        (self.start_host..=self.end_host)
            .map(|host| {
                let text = format!("{}{}", self.subnet_prefix, host);
                text.parse::<IpAddr>()
                    .map_err(|_| NetworkError::InvalidAddress(text))
            })
            .collect()
    }
}
