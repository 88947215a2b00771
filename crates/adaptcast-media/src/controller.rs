use std::{fmt, sync::Arc, time::Duration};

use adaptcast_core::{ClientRecord, ClientRegistry, StreamControl, unix_ms};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{ChangeHistory, ControllerConfig, HealthSummary, MediaError};

/// Rules that may act on the bitrate, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    BufferingHigh,
    BufferingLowSustained,
    RevertSpike,
    ChurnFreeze,
    CacheLow,
    CacheHigh,
    MissingTelemetry,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Rule::BufferingHigh => "buffering high",
            Rule::BufferingLowSustained => "buffering-free streak",
            Rule::RevertSpike => "spike after change",
            Rule::ChurnFreeze => "too many recent changes",
            Rule::CacheLow => "cache low",
            Rule::CacheHigh => "cache high",
            Rule::MissingTelemetry => "missing telemetry",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Decrease { from_kbps: u32, to_kbps: u32 },
    Increase { from_kbps: u32, to_kbps: u32 },
    Hold { bitrate_kbps: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub rule: Rule,
    pub action: Action,
}

/// Informational outcomes that never touch the bitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    BaselineRecorded { bitrate_kbps: u32 },
    StuckAtFloor { bitrate_kbps: u32, buffering_percent: u32 },
    SessionStable { bitrate_kbps: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub summary: HealthSummary,
    pub decision: Option<Decision>,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerState {
    pub bitrate_kbps: u32,
    /// Consecutive iterations with no active client buffering. Drives both
    /// the step-up rule and the session-stable notice.
    pub healthy_streak: u32,
    /// Same signal, counted separately for baseline recording.
    pub buffering_free_streak: u32,
    pub last_change_unix_ms: Option<u64>,
    pub baseline_kbps: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Down,
    Up,
}

/// Turns aggregate client health into at most one bitrate change per
/// iteration.
pub struct AdaptiveController {
    config: ControllerConfig,
    state: ControllerState,
    history: ChangeHistory,
    stream: Arc<dyn StreamControl>,
}

impl AdaptiveController {
    pub fn new(config: ControllerConfig, stream: Arc<dyn StreamControl>) -> Result<Self, MediaError> {
        config.validate()?;
        Ok(Self {
            state: ControllerState {
                bitrate_kbps: config.initial_bitrate_kbps,
                healthy_streak: 0,
                buffering_free_streak: 0,
                last_change_unix_ms: None,
                baseline_kbps: None,
            },
            history: ChangeHistory::new(config.churn_window_ms),
            config,
            stream,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn history(&self) -> &ChangeHistory {
        &self.history
    }

    pub fn bitrate_kbps(&self) -> u32 {
        self.state.bitrate_kbps
    }

    /// Runs one decision step over a registry snapshot. Returns `None` when
    /// there is no client outside its grace period to judge by.
    pub fn evaluate(
        &mut self,
        clients: &[ClientRecord],
        now_unix_ms: u64,
    ) -> Result<Option<IterationReport>, MediaError> {
        let Some(summary) = HealthSummary::from_records(
            clients,
            now_unix_ms,
            self.config.grace_ms(),
            self.config.staleness_ms,
        ) else {
            return Ok(None);
        };

        if summary.buffering_percent == 0 {
            self.state.healthy_streak = self.state.healthy_streak.saturating_add(1);
        } else {
            self.state.healthy_streak = 0;
        }

        let decision = self.evaluate_rules(&summary, now_unix_ms)?;

        let mut notices = Vec::new();
        notices.extend(self.record_baseline(&summary));
        if decision.is_none() {
            notices.extend(self.floor_alert(&summary));
            notices.extend(self.stable_session());
        }

        Ok(Some(IterationReport {
            summary,
            decision,
            notices,
        }))
    }

    fn evaluate_rules(
        &mut self,
        summary: &HealthSummary,
        now: u64,
    ) -> Result<Option<Decision>, MediaError> {
        let thresholds = self.config.thresholds;
        let cooled = self.cooldown_elapsed(now);

        if summary.buffering_percent > thresholds.buffering_high_percent && cooled {
            if let Some(decision) = self.step(Rule::BufferingHigh, Direction::Down, now)? {
                return Ok(Some(decision));
            }
        }

        if self.state.healthy_streak >= self.config.healthy_streak_target && cooled {
            if let Some(decision) = self.step(Rule::BufferingLowSustained, Direction::Up, now)? {
                self.state.healthy_streak = 0;
                return Ok(Some(decision));
            }
        }

        let changed_recently = self
            .history
            .latest()
            .is_some_and(|change| now.saturating_sub(change.at_unix_ms) < self.config.revert_window_ms);
        if changed_recently && summary.buffering_percent > thresholds.revert_spike_percent {
            if let Some(decision) = self.step(Rule::RevertSpike, Direction::Down, now)? {
                return Ok(Some(decision));
            }
        }

        if self.history.count_within(now, self.config.churn_window_ms) >= self.config.churn_threshold
        {
            return Ok(Some(Decision {
                rule: Rule::ChurnFreeze,
                action: Action::Hold {
                    bitrate_kbps: self.state.bitrate_kbps,
                },
            }));
        }

        let gated = [
            (
                summary.average_cache_percent < thresholds.cache_low_percent,
                Rule::CacheLow,
                Direction::Down,
            ),
            (
                summary.average_cache_percent > thresholds.cache_high_percent,
                Rule::CacheHigh,
                Direction::Up,
            ),
            (
                summary.missing_percent > thresholds.missing_percent,
                Rule::MissingTelemetry,
                Direction::Down,
            ),
        ];
        for (holds, rule, direction) in gated {
            if holds && cooled {
                if let Some(decision) = self.step(rule, direction, now)? {
                    return Ok(Some(decision));
                }
            }
        }

        Ok(None)
    }

    fn record_baseline(&mut self, summary: &HealthSummary) -> Option<Notice> {
        if summary.buffering_percent == 0 {
            self.state.buffering_free_streak = self.state.buffering_free_streak.saturating_add(1);
        } else {
            self.state.buffering_free_streak = 0;
        }
        if self.state.buffering_free_streak < self.config.stable_iterations() {
            return None;
        }
        self.state.buffering_free_streak = 0;
        self.state.baseline_kbps = Some(self.state.bitrate_kbps);
        Some(Notice::BaselineRecorded {
            bitrate_kbps: self.state.bitrate_kbps,
        })
    }

    fn floor_alert(&self, summary: &HealthSummary) -> Option<Notice> {
        (self.state.bitrate_kbps == self.config.limits.floor_kbps
            && summary.buffering_percent > self.config.thresholds.floor_alert_percent)
            .then_some(Notice::StuckAtFloor {
                bitrate_kbps: self.state.bitrate_kbps,
                buffering_percent: summary.buffering_percent,
            })
    }

    fn stable_session(&mut self) -> Option<Notice> {
        if self.state.healthy_streak < self.config.stable_iterations() {
            return None;
        }
        self.state.healthy_streak = 0;
        Some(Notice::SessionStable {
            bitrate_kbps: self.state.bitrate_kbps,
        })
    }

    fn cooldown_elapsed(&self, now: u64) -> bool {
        self.state
            .last_change_unix_ms
            .is_none_or(|last| now.saturating_sub(last) >= self.config.cooldown_ms)
    }

    /// A step that the limits clamp back to the current bitrate is not an
    /// action, so the rule falls through to the next one.
    fn step(
        &mut self,
        rule: Rule,
        direction: Direction,
        now: u64,
    ) -> Result<Option<Decision>, MediaError> {
        let from_kbps = self.state.bitrate_kbps;
        let to_kbps = match direction {
            Direction::Down => self.config.limits.step_down(from_kbps),
            Direction::Up => self.config.limits.step_up(from_kbps),
        };
        if to_kbps == from_kbps {
            return Ok(None);
        }
        self.apply_change(to_kbps, now)?;
        let action = match direction {
            Direction::Down => Action::Decrease { from_kbps, to_kbps },
            Direction::Up => Action::Increase { from_kbps, to_kbps },
        };
        Ok(Some(Decision { rule, action }))
    }

    fn apply_change(&mut self, kbps: u32, now: u64) -> Result<(), MediaError> {
        if kbps == self.state.bitrate_kbps {
            return Ok(());
        }
        self.stream.set_bitrate(kbps)?;
        self.state.bitrate_kbps = kbps;
        self.state.last_change_unix_ms = Some(now);
        self.history.record(kbps, now);
        Ok(())
    }

    /// Decision loop. Iterations start on a fixed period; a slow iteration
    /// makes the next one start immediately instead of piling up.
    pub async fn run(mut self, registry: ClientRegistry, shutdown: CancellationToken) {
        let mut ticker = interval(Duration::from_millis(self.config.iteration_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "controller started at {} kbps (range {}-{} step {}), iteration {}ms",
            self.state.bitrate_kbps,
            self.config.limits.floor_kbps,
            self.config.limits.ceil_kbps,
            self.config.limits.step_kbps,
            self.config.iteration_ms
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let clients = registry.snapshot();
            if clients.is_empty() {
                debug!("no clients connected; skipping iteration");
                continue;
            }
            match self.evaluate(&clients, unix_ms()) {
                Ok(Some(report)) => self.log_report(&report, &clients),
                Ok(None) => debug!(
                    "all {} client(s) still in grace period; skipping iteration",
                    clients.len()
                ),
                Err(err) => warn!("controller iteration failed: {err}"),
            }
        }
        info!("controller stopped at {} kbps", self.state.bitrate_kbps);
    }

    fn log_report(&self, report: &IterationReport, clients: &[ClientRecord]) {
        let summary = &report.summary;
        info!(
            "clients total={} active={} buffering={}% missing={}% avg_cache={}% struggling={} drop_delta={} bitrate={}kbps",
            summary.total,
            summary.active,
            summary.buffering_percent,
            summary.missing_percent,
            summary.average_cache_percent,
            summary.struggling,
            summary.drop_delta,
            self.state.bitrate_kbps
        );
        for client in clients {
            debug!(
                "client {} buffering={} cache={}% drops={} drop_delta={} healthy={} struggling={}",
                client.address(),
                client.is_buffering(),
                client.cache_percent(),
                client.dropped_frames(),
                client.drop_delta(),
                client.is_healthy(),
                client.is_struggling()
            );
        }
        debug!("stream client list: {:?}", self.stream.clients());

        match report.decision.map(|decision| (decision.rule, decision.action)) {
            Some((rule, Action::Decrease { from_kbps, to_kbps }))
            | Some((rule, Action::Increase { from_kbps, to_kbps })) => {
                info!("bitrate change {from_kbps} -> {to_kbps} kbps ({rule})");
            }
            Some((rule, Action::Hold { bitrate_kbps })) => {
                warn!("{rule}; holding bitrate at {bitrate_kbps} kbps");
            }
            None => {}
        }

        for notice in &report.notices {
            match notice {
                Notice::BaselineRecorded { bitrate_kbps } => {
                    info!("baseline stable bitrate: {bitrate_kbps} kbps");
                }
                Notice::StuckAtFloor {
                    bitrate_kbps,
                    buffering_percent,
                } => {
                    warn!(
                        "at minimum bitrate {bitrate_kbps} kbps but {buffering_percent}% of clients still buffering"
                    );
                }
                Notice::SessionStable { bitrate_kbps } => {
                    info!("session stable at {bitrate_kbps} kbps");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::{IpAddr, Ipv4Addr},
        sync::Mutex,
    };

    use adaptcast_core::StreamError;

    use super::*;
    use crate::BitrateLimits;

    const T0: u64 = 10_000_000;
    const SEC: u64 = 1_000;

    #[derive(Default)]
    struct RecordingStream {
        bitrates: Mutex<Vec<u32>>,
        reject: bool,
    }

    impl RecordingStream {
        fn bitrates(&self) -> Vec<u32> {
            self.bitrates.lock().unwrap().clone()
        }
    }

    impl StreamControl for RecordingStream {
        fn add_client(&self, _address: IpAddr) {}

        fn remove_client(&self, _address: IpAddr) {}

        fn set_bitrate(&self, kbps: u32) -> Result<(), StreamError> {
            if self.reject {
                return Err(StreamError::Stopped);
            }
            self.bitrates.lock().unwrap().push(kbps);
            Ok(())
        }

        fn clients(&self) -> Vec<IpAddr> {
            Vec::new()
        }
    }

    #[derive(Clone, Copy)]
    struct Client {
        buffering: bool,
        cache: i64,
        silent_ms: u64,
    }

    const STEADY: Client = Client {
        buffering: false,
        cache: 60,
        silent_ms: 0,
    };

    fn clients(now: u64, mix: &[(usize, Client)]) -> Vec<ClientRecord> {
        let mut records = Vec::new();
        for (count, client) in mix {
            for _ in 0..*count {
                let host = records.len() as u8 + 1;
                let mut record =
                    ClientRecord::new(IpAddr::V4(Ipv4Addr::new(10, 0, 30, host)), now - 120 * SEC);
                record.mark_updated(now - client.silent_ms);
                record.set_buffering(client.buffering);
                record.set_cache_percent(client.cache);
                records.push(record);
            }
        }
        records
    }

    fn buffering(percent_of_20: usize) -> Vec<(usize, Client)> {
        vec![
            (
                percent_of_20,
                Client {
                    buffering: true,
                    ..STEADY
                },
            ),
            (20 - percent_of_20, STEADY),
        ]
    }

    fn controller(initial: u32, ceil: u32) -> (AdaptiveController, Arc<RecordingStream>) {
        let stream = Arc::new(RecordingStream::default());
        let config = ControllerConfig {
            initial_bitrate_kbps: initial,
            limits: BitrateLimits {
                floor_kbps: 500,
                ceil_kbps: ceil,
                step_kbps: 500,
            },
            ..ControllerConfig::default()
        };
        let controller = AdaptiveController::new(config, stream.clone()).unwrap();
        (controller, stream)
    }

    fn decide(controller: &mut AdaptiveController, records: &[ClientRecord], now: u64) -> IterationReport {
        controller.evaluate(records, now).unwrap().unwrap()
    }

    #[test]
    fn buffering_high_steps_down() {
        let (mut ctl, stream) = controller(1_500, 2_000);
        let report = decide(&mut ctl, &clients(T0, &buffering(9)), T0);
        assert_eq!(report.summary.buffering_percent, 45);
        assert_eq!(
            report.decision,
            Some(Decision {
                rule: Rule::BufferingHigh,
                action: Action::Decrease {
                    from_kbps: 1_500,
                    to_kbps: 1_000
                }
            })
        );
        assert_eq!(stream.bitrates(), vec![1_000]);
        assert_eq!(ctl.state().last_change_unix_ms, Some(T0));
        assert_eq!(ctl.history().len(), 1);
    }

    #[test]
    fn sustained_buffering_free_streak_steps_up_once() {
        let (mut ctl, stream) = controller(1_000, 2_000);
        let steady = [(4, STEADY)];

        for i in 0..2 {
            let now = T0 + i * 5 * SEC;
            let report = decide(&mut ctl, &clients(now, &steady), now);
            assert_eq!(report.decision, None);
        }
        assert_eq!(ctl.state().healthy_streak, 2);

        let now = T0 + 10 * SEC;
        let report = decide(&mut ctl, &clients(now, &steady), now);
        assert_eq!(
            report.decision.map(|d| d.rule),
            Some(Rule::BufferingLowSustained)
        );
        assert_eq!(ctl.state().healthy_streak, 0);
        assert_eq!(ctl.bitrate_kbps(), 1_500);

        let now = T0 + 15 * SEC;
        let report = decide(&mut ctl, &clients(now, &steady), now);
        assert_eq!(report.decision, None);
        assert_eq!(stream.bitrates(), vec![1_500]);
    }

    #[test]
    fn spike_after_change_reverts_before_buffering_threshold() {
        let (mut ctl, stream) = controller(2_000, 2_000);
        decide(&mut ctl, &clients(T0, &buffering(20)), T0);
        assert_eq!(ctl.bitrate_kbps(), 1_500);

        let now = T0 + 10 * SEC;
        let report = decide(&mut ctl, &clients(now, &buffering(7)), now);
        assert_eq!(report.summary.buffering_percent, 35);
        assert_eq!(
            report.decision,
            Some(Decision {
                rule: Rule::RevertSpike,
                action: Action::Decrease {
                    from_kbps: 1_500,
                    to_kbps: 1_000
                }
            })
        );
        assert_eq!(stream.bitrates(), vec![1_500, 1_000]);
    }

    #[test]
    fn spike_outside_revert_window_is_ignored() {
        let (mut ctl, _stream) = controller(2_000, 2_000);
        decide(&mut ctl, &clients(T0, &buffering(20)), T0);

        let now = T0 + 16 * SEC;
        let report = decide(&mut ctl, &clients(now, &buffering(7)), now);
        assert_eq!(report.decision, None);
        assert_eq!(ctl.bitrate_kbps(), 1_500);
    }

    #[test]
    fn churn_freeze_holds_the_would_be_fifth_change() {
        let (mut ctl, stream) = controller(3_000, 5_000);
        for i in 0..4 {
            let now = T0 + i * 5 * SEC;
            let report = decide(&mut ctl, &clients(now, &buffering(20)), now);
            assert_eq!(report.decision.map(|d| d.rule), Some(Rule::BufferingHigh));
        }
        assert_eq!(ctl.bitrate_kbps(), 1_000);

        let now = T0 + 20 * SEC;
        let low_cache = [(
            5,
            Client {
                cache: 20,
                ..STEADY
            },
        )];
        let report = decide(&mut ctl, &clients(now, &low_cache), now);
        assert_eq!(
            report.decision,
            Some(Decision {
                rule: Rule::ChurnFreeze,
                action: Action::Hold {
                    bitrate_kbps: 1_000
                }
            })
        );
        assert_eq!(ctl.bitrate_kbps(), 1_000);
        assert_eq!(stream.bitrates().len(), 4);
    }

    #[test]
    fn floor_alert_without_underflow() {
        let (mut ctl, stream) = controller(500, 2_000);
        let mix = [
            (
                3,
                Client {
                    buffering: true,
                    ..STEADY
                },
            ),
            (2, STEADY),
        ];
        let report = decide(&mut ctl, &clients(T0, &mix), T0);
        assert_eq!(report.summary.buffering_percent, 60);
        assert_eq!(report.decision, None);
        assert_eq!(
            report.notices,
            vec![Notice::StuckAtFloor {
                bitrate_kbps: 500,
                buffering_percent: 60
            }]
        );
        assert_eq!(ctl.bitrate_kbps(), 500);
        assert!(stream.bitrates().is_empty());
    }

    #[test]
    fn missing_telemetry_steps_down() {
        let (mut ctl, _stream) = controller(1_500, 2_000);
        let mix = [
            (
                4,
                Client {
                    silent_ms: 20 * SEC,
                    ..STEADY
                },
            ),
            (6, STEADY),
        ];
        let report = decide(&mut ctl, &clients(T0, &mix), T0);
        assert_eq!(report.summary.missing_percent, 40);
        assert_eq!(
            report.decision.map(|d| d.rule),
            Some(Rule::MissingTelemetry)
        );
        assert_eq!(ctl.bitrate_kbps(), 1_000);
    }

    #[test]
    fn cache_rules_respect_cooldown() {
        let (mut ctl, _stream) = controller(1_500, 2_000);
        let low_cache = [
            (
                1,
                Client {
                    buffering: true,
                    cache: 30,
                    ..STEADY
                },
            ),
            (
                3,
                Client {
                    cache: 30,
                    ..STEADY
                },
            ),
        ];

        let report = decide(&mut ctl, &clients(T0, &low_cache), T0);
        assert_eq!(report.decision.map(|d| d.rule), Some(Rule::CacheLow));

        let now = T0 + 3 * SEC;
        let report = decide(&mut ctl, &clients(now, &low_cache), now);
        assert_eq!(report.decision, None);

        let now = T0 + 5 * SEC;
        let report = decide(&mut ctl, &clients(now, &low_cache), now);
        assert_eq!(report.decision.map(|d| d.rule), Some(Rule::CacheLow));
        assert_eq!(ctl.bitrate_kbps(), 500);
    }

    #[test]
    fn cache_high_steps_up() {
        let (mut ctl, _stream) = controller(1_000, 2_000);
        let full = [(
            2,
            Client {
                cache: 100,
                ..STEADY
            },
        )];
        let report = decide(&mut ctl, &clients(T0, &full), T0);
        assert_eq!(
            report.decision,
            Some(Decision {
                rule: Rule::CacheHigh,
                action: Action::Increase {
                    from_kbps: 1_000,
                    to_kbps: 1_500
                }
            })
        );
    }

    #[test]
    fn grace_period_clients_do_not_drive_decisions() {
        let (mut ctl, stream) = controller(1_500, 2_000);
        let mut records = clients(T0, &[(1, STEADY)]);
        let mut newcomer = ClientRecord::new(IpAddr::V4(Ipv4Addr::new(10, 0, 30, 99)), T0 - SEC);
        newcomer.set_buffering(true);
        newcomer.set_cache_percent(0);
        records.push(newcomer.clone());

        let report = decide(&mut ctl, &records, T0);
        assert_eq!(report.summary.active, 1);
        assert_eq!(report.summary.buffering_percent, 0);
        assert_eq!(report.decision, None);

        assert_eq!(ctl.evaluate(&[newcomer], T0).unwrap(), None);
        assert!(stream.bitrates().is_empty());
    }

    #[test]
    fn baseline_and_stability_after_a_quiet_minute() {
        let (mut ctl, stream) = controller(2_000, 2_000);
        let steady = [(3, STEADY)];
        let mut notices = Vec::new();
        for i in 0..12 {
            let now = T0 + i * 5 * SEC;
            let report = decide(&mut ctl, &clients(now, &steady), now);
            assert_eq!(report.decision, None);
            notices.extend(report.notices);
        }
        assert_eq!(
            notices,
            vec![
                Notice::BaselineRecorded {
                    bitrate_kbps: 2_000
                },
                Notice::SessionStable {
                    bitrate_kbps: 2_000
                },
            ]
        );
        assert_eq!(ctl.state().baseline_kbps, Some(2_000));
        assert_eq!(ctl.state().healthy_streak, 0);
        assert_eq!(ctl.state().buffering_free_streak, 0);
        assert!(stream.bitrates().is_empty());
    }

    #[test]
    fn rejected_actuation_leaves_state_untouched() {
        let stream = Arc::new(RecordingStream {
            reject: true,
            ..RecordingStream::default()
        });
        let config = ControllerConfig {
            initial_bitrate_kbps: 1_500,
            ..ControllerConfig::default()
        };
        let mut ctl = AdaptiveController::new(config, stream).unwrap();

        let err = ctl.evaluate(&clients(T0, &buffering(20)), T0).unwrap_err();
        assert_eq!(err, MediaError::Actuation(StreamError::Stopped));
        assert_eq!(ctl.bitrate_kbps(), 1_500);
        assert!(ctl.history().is_empty());
        assert_eq!(ctl.state().last_change_unix_ms, None);
    }

    #[tokio::test]
    async fn run_loop_acts_on_registry_and_stops_on_cancel() {
        let (ctl, stream) = controller(1_500, 2_000);
        let registry = ClientRegistry::new();
        let handle = registry.upsert(IpAddr::V4(Ipv4Addr::new(10, 0, 30, 5)), 0);
        handle.update(|record| {
            record.mark_updated(unix_ms());
            record.set_buffering(true);
        });

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(ctl.run(registry.clone(), shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(stream.bitrates(), vec![1_000]);
    }
}
