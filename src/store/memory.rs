//! Volatile in-memory backend.
//!
//! Keeps the same composite-key ordering as the persistent backend so the
//! two are interchangeable for everything except crash durability.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::Result;

use super::keys::{log_key, now_nanos, LOG_KEY_LEN};
use super::{
    scale_sample, tally, LogKind, MessageFilter, MessageRecord, TrafficStats, TrafficStore,
    STATS_SAMPLE,
};

#[derive(Default)]
struct Inner {
    pending: HashMap<u32, MessageRecord>,
    outbound: BTreeMap<[u8; LOG_KEY_LEN], MessageRecord>,
    inbound: BTreeMap<[u8; LOG_KEY_LEN], MessageRecord>,
    outbound_seq: u64,
    inbound_seq: u64,
}

impl Inner {
    fn log(&self, kind: LogKind) -> &BTreeMap<[u8; LOG_KEY_LEN], MessageRecord> {
        match kind {
            LogKind::Outbound => &self.outbound,
            LogKind::Inbound => &self.inbound,
        }
    }

    fn append(&mut self, kind: LogKind, record: &MessageRecord) {
        let counter = match kind {
            LogKind::Outbound => {
                self.outbound_seq += 1;
                self.outbound_seq
            }
            LogKind::Inbound => {
                self.inbound_seq += 1;
                self.inbound_seq
            }
        };
        let key = log_key(now_nanos(), counter);
        match kind {
            LogKind::Outbound => self.outbound.insert(key, record.clone()),
            LogKind::Inbound => self.inbound.insert(key, record.clone()),
        };
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrafficStore for MemoryStore {
    fn put_pending(&self, seq_id: u32, record: &MessageRecord) -> Result<()> {
        self.inner
            .write()
            .unwrap()
            .pending
            .insert(seq_id, record.clone());
        Ok(())
    }

    fn take_pending(&self, seq_id: u32) -> Result<Option<MessageRecord>> {
        Ok(self.inner.write().unwrap().pending.remove(&seq_id))
    }

    fn list_pending(&self) -> Result<Vec<MessageRecord>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .pending
            .values()
            .cloned()
            .collect())
    }

    fn append_outbound(&self, record: &MessageRecord) -> Result<()> {
        self.inner.write().unwrap().append(LogKind::Outbound, record);
        Ok(())
    }

    fn append_inbound(&self, record: &MessageRecord) -> Result<()> {
        self.inner.write().unwrap().append(LogKind::Inbound, record);
        Ok(())
    }

    fn list(&self, log: LogKind, offset: usize, limit: usize) -> Result<Vec<MessageRecord>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .log(log)
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn count(&self, log: LogKind) -> Result<u64> {
        Ok(self.inner.read().unwrap().log(log).len() as u64)
    }

    fn scan(
        &self,
        log: LogKind,
        filter: &MessageFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .log(log)
            .values()
            .filter(|r| filter.matches(r, log))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn count_matching(&self, log: LogKind, filter: &MessageFilter) -> Result<u64> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .log(log)
            .values()
            .filter(|r| filter.matches(r, log))
            .count() as u64)
    }

    fn stats(&self) -> Result<TrafficStats> {
        let inner = self.inner.read().unwrap();
        let mut stats = TrafficStats {
            total: inner.outbound.len() as u64,
            ..Default::default()
        };

        let mut sampled = 0;
        for record in inner.outbound.values().take(STATS_SAMPLE) {
            sampled += 1;
            tally(&mut stats, record);
        }
        scale_sample(&mut stats, sampled);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RESULT_AWAITING, RESULT_OK};
    use std::sync::Arc;

    fn record(dest: &str, result: u32) -> MessageRecord {
        let mut r = MessageRecord::outbound("", dest, "body");
        r.submit_result = result;
        r
    }

    #[test]
    fn pending_roundtrip_removes_entry() {
        let store = MemoryStore::new();
        store.put_pending(7, &record("13800138000", RESULT_AWAITING)).unwrap();

        let taken = store.take_pending(7).unwrap().unwrap();
        assert_eq!(taken.destination, "13800138000");
        assert!(store.take_pending(7).unwrap().is_none());
    }

    #[test]
    fn take_pending_is_exclusive_under_contention() {
        let store = Arc::new(MemoryStore::new());
        store.put_pending(1, &record("13800138000", RESULT_AWAITING)).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store.take_pending(1).unwrap().is_some()
            }));
        }

        let hits = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&hit| hit)
            .count();
        assert_eq!(hits, 1);
    }

    #[test]
    fn list_is_newest_first() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.append_outbound(&record(&format!("1380013800{i}"), 0)).unwrap();
        }

        let page = store.list(LogKind::Outbound, 0, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].destination, "13800138004");
        assert_eq!(page[1].destination, "13800138003");

        let rest = store.list(LogKind::Outbound, 2, 10).unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[2].destination, "13800138000");
    }

    #[test]
    fn stats_counts_waiting_as_neither() {
        let store = MemoryStore::new();
        store.append_outbound(&record("13800138000", RESULT_OK)).unwrap();
        store.append_outbound(&record("13800138001", 8)).unwrap();
        store.append_outbound(&record("13800138002", RESULT_AWAITING)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failed, 1);
        assert!(stats.total >= stats.success + stats.failed);
    }

    #[test]
    fn scan_applies_filter_then_paginates() {
        let store = MemoryStore::new();
        for i in 0..4 {
            store.append_outbound(&record("13800138000", i % 2)).unwrap();
        }
        store.append_outbound(&record("13900139000", 0)).unwrap();

        let filter = MessageFilter {
            destination: Some("138".into()),
            ..Default::default()
        };
        assert_eq!(store.count_matching(LogKind::Outbound, &filter).unwrap(), 4);

        let page = store.scan(LogKind::Outbound, &filter, 1, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|r| r.destination == "13800138000"));
    }
}
