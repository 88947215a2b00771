#![forbid(unsafe_code)]

use std::{
    net::IpAddr,
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;

mod client;
mod registry;

pub use client::{
    ClientRecord, HEALTHY_MIN_CACHE_PERCENT, STRUGGLING_MAX_CACHE_PERCENT,
    STRUGGLING_MIN_DROP_DELTA,
};
pub use registry::{ClientHandle, ClientRegistry};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream transport is stopped")]
    Stopped,
    #[error("stream transport rejected {kbps} kbps: {detail}")]
    Rejected { kbps: u32, detail: String },
}

/// Entry points of the streaming transport that the sensing and decision
/// loops drive. `set_bitrate` is only ever called from the controller task.
pub trait StreamControl: Send + Sync {
    fn add_client(&self, address: IpAddr);
    fn remove_client(&self, address: IpAddr);
    fn set_bitrate(&self, kbps: u32) -> Result<(), StreamError>;
    fn clients(&self) -> Vec<IpAddr>;
}

pub fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
