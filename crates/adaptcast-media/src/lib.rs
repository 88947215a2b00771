#![forbid(unsafe_code)]

use adaptcast_core::StreamError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod controller;
mod health;
mod history;

pub use controller::{
    Action, AdaptiveController, ControllerState, Decision, IterationReport, Notice, Rule,
};
pub use health::HealthSummary;
pub use history::{BitrateChange, ChangeHistory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitrateLimits {
    pub floor_kbps: u32,
    pub ceil_kbps: u32,
    pub step_kbps: u32,
}

impl Default for BitrateLimits {
    fn default() -> Self {
        Self {
            floor_kbps: 500,
            ceil_kbps: 2_000,
            step_kbps: 500,
        }
    }
}

impl BitrateLimits {
    pub fn validate(&self) -> Result<(), MediaError> {
        if self.floor_kbps == 0 || self.floor_kbps > self.ceil_kbps {
            return Err(MediaError::InvalidLimits);
        }
        if self.step_kbps == 0 {
            return Err(MediaError::ZeroSetting("step_kbps"));
        }
        Ok(())
    }

    pub fn step_down(&self, current_kbps: u32) -> u32 {
        current_kbps
            .saturating_sub(self.step_kbps)
            .clamp(self.floor_kbps, self.ceil_kbps)
    }

    pub fn step_up(&self, current_kbps: u32) -> u32 {
        current_kbps
            .saturating_add(self.step_kbps)
            .clamp(self.floor_kbps, self.ceil_kbps)
    }
}

/// Percent thresholds of the decision rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    pub buffering_high_percent: u32,
    pub revert_spike_percent: u32,
    pub cache_low_percent: u32,
    pub cache_high_percent: u32,
    pub missing_percent: u32,
    pub floor_alert_percent: u32,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            buffering_high_percent: 40,
            revert_spike_percent: 30,
            cache_low_percent: 40,
            cache_high_percent: 90,
            missing_percent: 30,
            floor_alert_percent: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub iteration_ms: u64,
    pub initial_bitrate_kbps: u32,
    pub limits: BitrateLimits,
    pub cooldown_ms: u64,
    pub staleness_ms: u64,
    pub grace_iterations: u32,
    pub revert_window_ms: u64,
    pub churn_window_ms: u64,
    pub churn_threshold: usize,
    pub healthy_streak_target: u32,
    pub stable_window_ms: u64,
    pub thresholds: RuleThresholds,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            iteration_ms: 5_000,
            initial_bitrate_kbps: 500,
            limits: BitrateLimits::default(),
            cooldown_ms: 5_000,
            staleness_ms: 15_000,
            grace_iterations: 5,
            revert_window_ms: 15_000,
            churn_window_ms: 60_000,
            churn_threshold: 4,
            healthy_streak_target: 3,
            stable_window_ms: 60_000,
            thresholds: RuleThresholds::default(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), MediaError> {
        self.limits.validate()?;
        let BitrateLimits {
            floor_kbps,
            ceil_kbps,
            ..
        } = self.limits;
        if !(floor_kbps..=ceil_kbps).contains(&self.initial_bitrate_kbps) {
            return Err(MediaError::InitialOutOfRange {
                initial: self.initial_bitrate_kbps,
                floor: floor_kbps,
                ceil: ceil_kbps,
            });
        }
        for (name, value) in [
            ("iteration_ms", self.iteration_ms),
            ("churn_window_ms", self.churn_window_ms),
            ("churn_threshold", self.churn_threshold as u64),
            ("healthy_streak_target", u64::from(self.healthy_streak_target)),
        ] {
            if value == 0 {
                return Err(MediaError::ZeroSetting(name));
            }
        }
        Ok(())
    }

    pub fn grace_ms(&self) -> u64 {
        u64::from(self.grace_iterations).saturating_mul(self.iteration_ms)
    }

    /// Iterations that make up the baseline/stability window, at least one.
    pub fn stable_iterations(&self) -> u32 {
        let iterations = self.stable_window_ms / self.iteration_ms.max(1);
        u32::try_from(iterations).unwrap_or(u32::MAX).max(1)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("invalid bitrate limits")]
    InvalidLimits,
    #[error("initial bitrate {initial} kbps outside {floor}-{ceil} kbps")]
    InitialOutOfRange { initial: u32, floor: u32, ceil: u32 },
    #[error("{0} must be greater than zero")]
    ZeroSetting(&'static str),
    #[error("bitrate actuation failed: {0}")]
    Actuation(#[from] StreamError),
}
