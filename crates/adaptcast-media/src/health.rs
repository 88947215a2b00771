use adaptcast_core::ClientRecord;

/// Aggregate health of the clients that are past their grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSummary {
    pub total: usize,
    pub active: usize,
    pub buffering_percent: u32,
    pub missing_percent: u32,
    pub average_cache_percent: u32,
    pub struggling: usize,
    pub drop_delta: u64,
}

impl HealthSummary {
    /// Returns `None` when no client is past its grace period.
    pub fn from_records(
        records: &[ClientRecord],
        now_unix_ms: u64,
        grace_ms: u64,
        staleness_ms: u64,
    ) -> Option<Self> {
        let mut active = 0_usize;
        let mut buffering = 0_usize;
        let mut missing = 0_usize;
        let mut struggling = 0_usize;
        let mut cache_sum = 0_u64;
        let mut drop_delta = 0_u64;

        for record in records
            .iter()
            .filter(|record| !record.in_grace_period(now_unix_ms, grace_ms))
        {
            active += 1;
            if record.is_buffering() {
                buffering += 1;
            }
            if record.is_stale(now_unix_ms, staleness_ms) {
                missing += 1;
            }
            if record.is_struggling() {
                struggling += 1;
            }
            cache_sum += u64::from(record.cache_percent());
            drop_delta = drop_delta.saturating_add(record.drop_delta());
        }

        if active == 0 {
            return None;
        }
        Some(Self {
            total: records.len(),
            active,
            buffering_percent: percent_of(buffering, active),
            missing_percent: percent_of(missing, active),
            average_cache_percent: (cache_sum / active as u64) as u32,
            struggling,
            drop_delta,
        })
    }

    pub fn in_grace(&self) -> usize {
        self.total - self.active
    }
}

fn percent_of(count: usize, of: usize) -> u32 {
    (count * 100 / of) as u32
}
