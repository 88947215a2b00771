use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateChange {
    pub bitrate_kbps: u32,
    pub at_unix_ms: u64,
}

/// Rolling record of applied bitrate changes. Entries leave only from the
/// front, once they are a full window old.
#[derive(Debug, Clone)]
pub struct ChangeHistory {
    window_ms: u64,
    entries: VecDeque<BitrateChange>,
}

impl ChangeHistory {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            entries: VecDeque::new(),
        }
    }

    pub fn record(&mut self, bitrate_kbps: u32, now_unix_ms: u64) {
        self.entries.push_back(BitrateChange {
            bitrate_kbps,
            at_unix_ms: now_unix_ms,
        });
        self.evict(now_unix_ms);
    }

    pub fn evict(&mut self, now_unix_ms: u64) {
        while self
            .entries
            .front()
            .is_some_and(|change| now_unix_ms.saturating_sub(change.at_unix_ms) >= self.window_ms)
        {
            self.entries.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&BitrateChange> {
        self.entries.back()
    }

    pub fn count_within(&self, now_unix_ms: u64, span_ms: u64) -> usize {
        self.entries
            .iter()
            .filter(|change| now_unix_ms.saturating_sub(change.at_unix_ms) < span_ms)
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BitrateChange> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
