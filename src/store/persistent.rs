//! Durable backend on a fjall LSM keyspace.
//!
//! Four partitions: `pending` (4-byte big-endian sequence id), the two
//! traffic logs (16-byte composite key, newest first), and `counters`
//! holding the per-log monotone counters so tie-break order survives a
//! restart. Records are serialized as JSON.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};

use super::keys::{log_key, now_nanos, seq_key};
use super::{
    scale_sample, tally, LogKind, MessageFilter, MessageRecord, TrafficStats, TrafficStore,
    STATS_SAMPLE,
};

const PENDING: &str = "pending";
const COUNTERS: &str = "counters";

pub struct PersistentStore {
    keyspace: Keyspace,
    pending: PartitionHandle,
    outbound: PartitionHandle,
    inbound: PartitionHandle,
    counters: PartitionHandle,
    outbound_seq: AtomicU64,
    inbound_seq: AtomicU64,
    // take_pending must be an atomic get-and-delete across tasks
    pending_lock: Mutex<()>,
}

impl PersistentStore {
    /// Open or create the keyspace at `path` and recover the log counters.
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("failed to create data directory {}", path.display()))?;

        let keyspace = Config::new(path).open()?;
        let pending = keyspace.open_partition(PENDING, PartitionCreateOptions::default())?;
        let outbound = keyspace
            .open_partition(LogKind::Outbound.name(), PartitionCreateOptions::default())?;
        let inbound =
            keyspace.open_partition(LogKind::Inbound.name(), PartitionCreateOptions::default())?;
        let counters = keyspace.open_partition(COUNTERS, PartitionCreateOptions::default())?;

        let outbound_seq = recover_counter(&counters, LogKind::Outbound)?;
        let inbound_seq = recover_counter(&counters, LogKind::Inbound)?;

        let store = Arc::new(Self {
            keyspace,
            pending,
            outbound,
            inbound,
            counters,
            outbound_seq: AtomicU64::new(outbound_seq),
            inbound_seq: AtomicU64::new(inbound_seq),
            pending_lock: Mutex::new(()),
        });

        tracing::info!(
            path = %path.display(),
            pending = store.pending.len().unwrap_or(0),
            outbound_seq,
            inbound_seq,
            "persistent store opened"
        );

        Ok(store)
    }

    fn log(&self, kind: LogKind) -> &PartitionHandle {
        match kind {
            LogKind::Outbound => &self.outbound,
            LogKind::Inbound => &self.inbound,
        }
    }

    fn append(&self, kind: LogKind, record: &MessageRecord) -> Result<()> {
        let counter = match kind {
            LogKind::Outbound => self.outbound_seq.fetch_add(1, Ordering::SeqCst) + 1,
            LogKind::Inbound => self.inbound_seq.fetch_add(1, Ordering::SeqCst) + 1,
        };

        let key = log_key(now_nanos(), counter);
        let value = serde_json::to_vec(record)?;
        self.log(kind).insert(key, &value)?;
        self.counters.insert(kind.name(), counter.to_be_bytes())?;
        Ok(())
    }

    /// Flush everything to disk. Used by tests around restart behavior;
    /// normal operation relies on the journal.
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

fn recover_counter(counters: &PartitionHandle, kind: LogKind) -> Result<u64> {
    let value = counters.get(kind.name())?;
    Ok(value
        .as_deref()
        .and_then(|v| v.try_into().ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0))
}

impl TrafficStore for PersistentStore {
    fn put_pending(&self, seq_id: u32, record: &MessageRecord) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        self.pending.insert(seq_key(seq_id), &value)?;
        Ok(())
    }

    fn take_pending(&self, seq_id: u32) -> Result<Option<MessageRecord>> {
        let _guard = self.pending_lock.lock().unwrap();

        let key = seq_key(seq_id);
        let Some(value) = self.pending.get(key)? else {
            return Ok(None);
        };
        let record: MessageRecord = serde_json::from_slice(&value)?;
        self.pending.remove(key)?;
        Ok(Some(record))
    }

    fn list_pending(&self) -> Result<Vec<MessageRecord>> {
        let mut result = Vec::new();
        for item in self.pending.iter() {
            let (_, value) = item?;
            result.push(serde_json::from_slice(&value)?);
        }
        Ok(result)
    }

    fn append_outbound(&self, record: &MessageRecord) -> Result<()> {
        self.append(LogKind::Outbound, record)
    }

    fn append_inbound(&self, record: &MessageRecord) -> Result<()> {
        self.append(LogKind::Inbound, record)
    }

    fn list(&self, log: LogKind, offset: usize, limit: usize) -> Result<Vec<MessageRecord>> {
        // ascending key order is newest-first under the inverted time key
        let mut result = Vec::new();
        for item in self.log(log).iter().skip(offset).take(limit) {
            let (_, value) = item?;
            result.push(serde_json::from_slice(&value)?);
        }
        Ok(result)
    }

    fn count(&self, log: LogKind) -> Result<u64> {
        Ok(self.log(log).len()? as u64)
    }

    fn scan(
        &self,
        log: LogKind,
        filter: &MessageFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let mut result = Vec::new();
        let mut skipped = 0;
        for item in self.log(log).iter() {
            if result.len() >= limit {
                break;
            }
            let (_, value) = item?;
            let record: MessageRecord = serde_json::from_slice(&value)?;
            if !filter.matches(&record, log) {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            result.push(record);
        }
        Ok(result)
    }

    fn count_matching(&self, log: LogKind, filter: &MessageFilter) -> Result<u64> {
        let mut count = 0;
        for item in self.log(log).iter() {
            let (_, value) = item?;
            let record: MessageRecord = serde_json::from_slice(&value)?;
            if filter.matches(&record, log) {
                count += 1;
            }
        }
        Ok(count)
    }

    fn stats(&self) -> Result<TrafficStats> {
        let mut stats = TrafficStats {
            total: self.count(LogKind::Outbound)?,
            ..Default::default()
        };

        let mut sampled = 0;
        for item in self.outbound.iter().take(STATS_SAMPLE) {
            let (_, value) = item?;
            let record: MessageRecord = serde_json::from_slice(&value)?;
            sampled += 1;
            tally(&mut stats, &record);
        }
        scale_sample(&mut stats, sampled);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RESULT_AWAITING, RESULT_OK};
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Arc<PersistentStore> {
        PersistentStore::open(dir.path()).unwrap()
    }

    fn record(dest: &str, result: u32) -> MessageRecord {
        let mut r = MessageRecord::outbound("", dest, "body");
        r.submit_result = result;
        r
    }

    #[test]
    fn pending_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            store
                .put_pending(42, &record("13800138000", RESULT_AWAITING))
                .unwrap();
            store.flush().unwrap();
        }

        let store = open(&dir);
        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].destination, "13800138000");
        assert_eq!(pending[0].submit_result, RESULT_AWAITING);

        // the entry stays until explicitly taken
        let taken = store.take_pending(42).unwrap().unwrap();
        assert_eq!(taken.destination, "13800138000");
        assert!(store.take_pending(42).unwrap().is_none());
    }

    #[test]
    fn take_pending_hits_at_most_once() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store
            .put_pending(9, &record("13800138000", RESULT_AWAITING))
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store.take_pending(9).unwrap().is_some()
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
    fn list_pages_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        for i in 0..5 {
            store
                .append_outbound(&record(&format!("1380013800{i}"), RESULT_OK))
                .unwrap();
        }

        let head = store.list(LogKind::Outbound, 0, 2).unwrap();
        assert_eq!(head[0].destination, "13800138004");
        assert_eq!(head[1].destination, "13800138003");

        let tail = store.list(LogKind::Outbound, 3, 5).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].destination, "13800138000");
    }

    #[test]
    fn log_counter_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            store.append_outbound(&record("13800138000", 0)).unwrap();
            store.append_outbound(&record("13800138001", 0)).unwrap();
            store.flush().unwrap();
        }

        let store = open(&dir);
        assert_eq!(store.outbound_seq.load(Ordering::SeqCst), 2);

        store.append_outbound(&record("13800138002", 0)).unwrap();
        let head = store.list(LogKind::Outbound, 0, 1).unwrap();
        assert_eq!(head[0].destination, "13800138002");
        assert_eq!(store.count(LogKind::Outbound).unwrap(), 3);
    }

    #[test]
    fn scan_filters_and_counts() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.append_outbound(&record("13800138000", 0)).unwrap();
        store.append_outbound(&record("13900139000", 8)).unwrap();
        store.append_inbound(&record("13800138000", 0)).unwrap();

        let filter = MessageFilter {
            destination: Some("139".into()),
            ..Default::default()
        };
        assert_eq!(
            store.count_matching(LogKind::Outbound, &filter).unwrap(),
            1
        );
        let matches = store.scan(LogKind::Outbound, &filter, 0, 10).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].submit_result, 8);
    }

    #[test]
    fn stats_over_small_log_are_exact() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.append_outbound(&record("13800138000", RESULT_OK)).unwrap();
        store.append_outbound(&record("13800138001", 13)).unwrap();
        store
            .append_outbound(&record("13800138002", RESULT_AWAITING))
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total, stats.success + stats.failed + 1);
    }
}
