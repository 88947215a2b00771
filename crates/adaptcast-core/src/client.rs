use std::net::IpAddr;

pub const HEALTHY_MIN_CACHE_PERCENT: u8 = 80;
pub const STRUGGLING_MAX_CACHE_PERCENT: u8 = 40;
pub const STRUGGLING_MIN_DROP_DELTA: u64 = 3;

/// Playback telemetry of one receiver, keyed by its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    address: IpAddr,
    cache_percent: u8,
    buffering: bool,
    dropped_frames: u64,
    previous_dropped_frames: u64,
    last_update_unix_ms: u64,
    first_seen_unix_ms: u64,
    updated: bool,
}

impl ClientRecord {
    pub fn new(address: IpAddr, now_unix_ms: u64) -> Self {
        Self {
            address,
            cache_percent: 100,
            buffering: false,
            dropped_frames: 0,
            previous_dropped_frames: 0,
            last_update_unix_ms: now_unix_ms,
            first_seen_unix_ms: now_unix_ms,
            updated: false,
        }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn cache_percent(&self) -> u8 {
        self.cache_percent
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn previous_dropped_frames(&self) -> u64 {
        self.previous_dropped_frames
    }

    /// Drops since the previous report. A counter that went backwards reads as zero.
    pub fn drop_delta(&self) -> u64 {
        self.dropped_frames
            .saturating_sub(self.previous_dropped_frames)
    }

    pub fn last_update_unix_ms(&self) -> u64 {
        self.last_update_unix_ms
    }

    pub fn first_seen_unix_ms(&self) -> u64 {
        self.first_seen_unix_ms
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn set_cache_percent(&mut self, percent: i64) {
        self.cache_percent = percent.clamp(0, 100) as u8;
    }

    pub fn set_buffering(&mut self, buffering: bool) {
        self.buffering = buffering;
    }

    pub fn set_dropped_frames(&mut self, count: u64) {
        self.previous_dropped_frames = self.dropped_frames;
        self.dropped_frames = count;
    }

    pub fn mark_updated(&mut self, now_unix_ms: u64) {
        self.updated = true;
        self.last_update_unix_ms = now_unix_ms;
    }

    pub fn reset_updated_flag(&mut self) {
        self.updated = false;
    }

    /// Returns whether anything arrived since the last call and clears the flag.
    pub fn take_updated(&mut self) -> bool {
        std::mem::replace(&mut self.updated, false)
    }

    pub fn is_stale(&self, now_unix_ms: u64, staleness_ms: u64) -> bool {
        now_unix_ms.saturating_sub(self.last_update_unix_ms) >= staleness_ms
    }

    pub fn in_grace_period(&self, now_unix_ms: u64, grace_ms: u64) -> bool {
        now_unix_ms.saturating_sub(self.first_seen_unix_ms) < grace_ms
    }

    pub fn is_healthy(&self) -> bool {
        self.cache_percent >= HEALTHY_MIN_CACHE_PERCENT && !self.buffering && self.drop_delta() == 0
    }

    pub fn is_struggling(&self) -> bool {
        self.buffering
            || self.cache_percent <= STRUGGLING_MAX_CACHE_PERCENT
            || self.drop_delta() > STRUGGLING_MIN_DROP_DELTA
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn record() -> ClientRecord {
        ClientRecord::new(IpAddr::V4(Ipv4Addr::new(10, 0, 30, 7)), 1_000)
    }

    #[test]
    fn cache_percent_is_clamped_on_every_write() {
        let mut rec = record();
        for (input, expected) in [(-25, 0), (0, 0), (42, 42), (100, 100), (250, 100)] {
            rec.set_cache_percent(input);
            assert_eq!(rec.cache_percent(), expected, "input {input}");
        }
        rec.set_cache_percent(i64::MAX);
        assert_eq!(rec.cache_percent(), 100);
    }

    #[test]
    fn drop_delta_never_goes_negative_on_counter_reset() {
        let mut rec = record();
        rec.set_dropped_frames(10);
        rec.set_dropped_frames(14);
        assert_eq!(rec.drop_delta(), 4);

        rec.set_dropped_frames(2);
        assert_eq!(rec.previous_dropped_frames(), 14);
        assert_eq!(rec.drop_delta(), 0);
    }

    #[test]
    fn updated_flag_is_a_handshake() {
        let mut rec = record();
        assert!(!rec.take_updated());

        rec.mark_updated(2_500);
        assert!(rec.is_updated());
        assert_eq!(rec.last_update_unix_ms(), 2_500);
        assert!(rec.take_updated());
        assert!(!rec.is_updated());

        rec.mark_updated(3_000);
        rec.reset_updated_flag();
        assert!(!rec.take_updated());
    }

    #[test]
    fn staleness_and_grace_use_their_own_timestamps() {
        let mut rec = record();
        rec.mark_updated(5_000);

        assert!(!rec.is_stale(19_999, 15_000));
        assert!(rec.is_stale(20_000, 15_000));

        assert!(rec.in_grace_period(25_999, 25_000));
        assert!(!rec.in_grace_period(26_000, 25_000));
    }

    #[test]
    fn health_classification() {
        let mut rec = record();
        assert!(rec.is_healthy());
        assert!(!rec.is_struggling());

        rec.set_cache_percent(60);
        assert!(!rec.is_healthy());
        assert!(!rec.is_struggling());

        rec.set_cache_percent(90);
        rec.set_dropped_frames(5);
        assert!(!rec.is_healthy());
        assert!(rec.is_struggling());

        rec.set_dropped_frames(5);
        rec.set_buffering(true);
        assert!(rec.is_struggling());
    }
}
