use std::{net::IpAddr, sync::Arc};

use dashmap::DashMap;

use crate::ClientRecord;

type Records = Arc<DashMap<IpAddr, ClientRecord>>;

/// Live receivers shared between the monitor (writer) and the controller (reader).
///
/// Records sit in a sharded map, so writers only contend on the shard that holds
/// their address. A snapshot copies each record while holding its shard lock.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    records: Records,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the record if absent. Calling it again for a live address keeps the
    /// existing telemetry.
    pub fn upsert(&self, address: IpAddr, now_unix_ms: u64) -> ClientHandle {
        self.records
            .entry(address)
            .or_insert_with(|| ClientRecord::new(address, now_unix_ms));
        ClientHandle {
            address,
            records: self.records.clone(),
        }
    }

    pub fn handle(&self, address: IpAddr) -> Option<ClientHandle> {
        self.records.contains_key(&address).then(|| ClientHandle {
            address,
            records: self.records.clone(),
        })
    }

    pub fn remove(&self, address: IpAddr) -> Option<ClientRecord> {
        self.records.remove(&address).map(|(_, record)| record)
    }

    pub fn contains(&self, address: IpAddr) -> bool {
        self.records.contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copies every record, ordered by address.
    pub fn snapshot(&self) -> Vec<ClientRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(ClientRecord::address);
        records
    }
}

/// Write access to one record. Once the record is removed from the registry
/// every mutation becomes a no-op and reports `false`.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    address: IpAddr,
    records: Records,
}

impl ClientHandle {
    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn is_registered(&self) -> bool {
        self.records.contains_key(&self.address)
    }

    /// Runs `apply` while holding the record's shard lock, so a snapshot sees
    /// either none or all of its writes.
    pub fn update<R>(&self, apply: impl FnOnce(&mut ClientRecord) -> R) -> Option<R> {
        self.records
            .get_mut(&self.address)
            .map(|mut entry| apply(entry.value_mut()))
    }

    pub fn record(&self) -> Option<ClientRecord> {
        self.records
            .get(&self.address)
            .map(|entry| entry.value().clone())
    }

    pub fn set_cache_percent(&self, percent: i64) -> bool {
        self.update(|record| record.set_cache_percent(percent))
            .is_some()
    }

    pub fn set_buffering(&self, buffering: bool) -> bool {
        self.update(|record| record.set_buffering(buffering))
            .is_some()
    }

    pub fn set_dropped_frames(&self, count: u64) -> bool {
        self.update(|record| record.set_dropped_frames(count))
            .is_some()
    }

    pub fn mark_updated(&self, now_unix_ms: u64) -> bool {
        self.update(|record| record.mark_updated(now_unix_ms))
            .is_some()
    }

    pub fn reset_updated_flag(&self) -> bool {
        self.update(ClientRecord::reset_updated_flag).is_some()
    }

    pub fn take_updated(&self) -> Option<bool> {
        self.update(ClientRecord::take_updated)
    }
}
