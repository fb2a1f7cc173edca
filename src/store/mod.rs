//! Traffic store: pending-response correlation table plus the outbound
//! and inbound message logs.
//!
//! Two backends implement the same contract:
//!
//! - [`PersistentStore`]: fjall LSM keyspace, survives restarts (default)
//! - [`MemoryStore`]: volatile, for the `redis`-style cache flag and tests
//!
//! Both order the logs newest-first through the composite key built in
//! `keys`, so every observable behavior except durability is identical.

mod factory;
mod keys;
mod memory;
mod persistent;

pub use factory::create_store;
pub use memory::MemoryStore;
pub use persistent::PersistentStore;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accepted by the SMSC.
pub const RESULT_OK: u32 = 0;
/// Waiting for the asynchronous submit-response.
pub const RESULT_AWAITING: u32 = 65535;
/// The send itself failed; the frame never reached the wire.
pub const RESULT_SEND_FAILED: u32 = 254;
/// Rejected locally before the wire (validation).
pub const RESULT_REJECTED_LOCAL: u32 = 255;

/// `message_id` sentinel for records rejected by local validation.
pub const MSG_ID_ERROR: &str = "ERROR";
/// `message_id` sentinel for records whose send failed.
pub const MSG_ID_SEND_ERROR: &str = "SEND_ERROR";

/// One outbound or inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub source: String,
    pub destination: String,
    pub content: String,
    #[serde(default)]
    pub message_id: String,
    pub created_at: DateTime<Utc>,
    pub submit_result: u32,
    pub delivery_result: u32,
}

impl MessageRecord {
    /// A freshly accepted submission, awaiting its submit-response.
    pub fn outbound(source: &str, destination: &str, content: &str) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            content: content.to_string(),
            message_id: String::new(),
            created_at: Utc::now(),
            submit_result: RESULT_AWAITING,
            delivery_result: RESULT_AWAITING,
        }
    }

    /// A mobile-originated message received from the SMSC.
    pub fn inbound(source: &str, destination: &str, content: &str, message_id: String) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            content: content.to_string(),
            message_id,
            created_at: Utc::now(),
            submit_result: RESULT_OK,
            delivery_result: RESULT_OK,
        }
    }
}

/// Which traffic log an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Outbound,
    Inbound,
}

impl LogKind {
    pub fn name(self) -> &'static str {
        match self {
            LogKind::Outbound => "outbound_log",
            LogKind::Inbound => "inbound_log",
        }
    }
}

/// Status filter over the outbound log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    /// `submit_result == 0`
    Accepted,
    /// `submit_result != 0`, the waiting sentinel included
    Failed,
}

impl StatusFilter {
    /// Parse the query-string form: `"0"` accepted, `"1"` failed,
    /// empty means no filter.
    pub fn from_param(raw: &str) -> Result<Option<Self>, String> {
        match raw {
            "" => Ok(None),
            "0" => Ok(Some(StatusFilter::Accepted)),
            "1" => Ok(Some(StatusFilter::Failed)),
            other => Err(format!("unrecognized status filter: {other}")),
        }
    }
}

/// Recognized search filters. Fields that do not apply to a log kind are
/// ignored when matching against it.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Case-insensitive substring over the body.
    pub content: Option<String>,
    /// Substring over the destination address.
    pub destination: Option<String>,
    /// Substring over the source address (inbound only).
    pub source: Option<String>,
    /// Outcome filter (outbound only).
    pub status: Option<StatusFilter>,
}

impl MessageFilter {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.destination.is_none()
            && self.source.is_none()
            && self.status.is_none()
    }

    pub fn matches(&self, record: &MessageRecord, log: LogKind) -> bool {
        if let Some(needle) = &self.content {
            if !contains_ci(&record.content, needle) {
                return false;
            }
        }
        if let Some(needle) = &self.destination {
            if !contains_ci(&record.destination, needle) {
                return false;
            }
        }
        match log {
            LogKind::Outbound => {
                if let Some(status) = self.status {
                    let accepted = record.submit_result == RESULT_OK;
                    match status {
                        StatusFilter::Accepted if !accepted => return false,
                        StatusFilter::Failed if accepted => return false,
                        _ => {}
                    }
                }
            }
            LogKind::Inbound => {
                if let Some(needle) = &self.source {
                    if !contains_ci(&record.source, needle) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    needle.is_empty() || haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Aggregate outcome counts over the outbound log. `success` and
/// `failed` are estimated from the newest 1000 records when the log is
/// larger; records still awaiting a response count as neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
}

/// Number of newest records inspected by [`TrafficStore::stats`].
pub const STATS_SAMPLE: usize = 1000;

/// Storage contract shared by all backends.
pub trait TrafficStore: Send + Sync {
    /// Park a record awaiting its submit-response, keyed by wire sequence id.
    fn put_pending(&self, seq_id: u32, record: &MessageRecord) -> Result<()>;

    /// Atomically fetch and delete a parked record.
    fn take_pending(&self, seq_id: u32) -> Result<Option<MessageRecord>>;

    /// Snapshot of every parked record.
    fn list_pending(&self) -> Result<Vec<MessageRecord>>;

    fn append_outbound(&self, record: &MessageRecord) -> Result<()>;

    fn append_inbound(&self, record: &MessageRecord) -> Result<()>;

    /// Page through a log, newest first.
    fn list(&self, log: LogKind, offset: usize, limit: usize) -> Result<Vec<MessageRecord>>;

    fn count(&self, log: LogKind) -> Result<u64>;

    /// Page through the records matching `filter`, newest first.
    fn scan(
        &self,
        log: LogKind,
        filter: &MessageFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<MessageRecord>>;

    fn count_matching(&self, log: LogKind, filter: &MessageFilter) -> Result<u64>;

    fn stats(&self) -> Result<TrafficStats>;
}

pub type SharedStore = Arc<dyn TrafficStore>;

/// Fold one sampled record into the running success/failure tally.
fn tally(stats: &mut TrafficStats, record: &MessageRecord) {
    if record.submit_result == RESULT_OK {
        stats.success += 1;
    } else if record.submit_result != RESULT_AWAITING {
        stats.failed += 1;
    }
}

/// Scale a sampled tally up to the full log size.
fn scale_sample(stats: &mut TrafficStats, sampled: usize) {
    if stats.total > sampled as u64 && sampled > 0 {
        let ratio = stats.total as f64 / sampled as f64;
        stats.success = (stats.success as f64 * ratio) as u64;
        stats.failed = (stats.failed as f64 * ratio) as u64;
    }
}
