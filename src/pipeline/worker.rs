//! The submission worker.
//!
//! Drains the bounded ingress channel and converts every submission into
//! exactly one of: a parked pending record (sent, awaiting response), or
//! an outbound-log record stamped with a local failure code. Errors never
//! propagate back across the ingress boundary.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::SubmitReq;
use crate::session::SessionManager;
use crate::store::{
    MessageRecord, SharedStore, MSG_ID_ERROR, MSG_ID_SEND_ERROR, RESULT_REJECTED_LOCAL,
    RESULT_SEND_FAILED,
};
use crate::telemetry::counters;

use super::validation::{derive_source, validate_submit};

/// One message handed in by the HTTP front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Optional extension code identifying the sub-sender.
    pub source: String,
    pub destination: String,
    pub content: String,
}

/// Wire-field constants for every submit this gateway builds.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Carrier access number; the base of the on-wire originator.
    pub access_no: String,
    pub service_id: String,
    /// Enterprise code carried in `msg_src`.
    pub msg_src: String,
}

impl PipelineConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            access_no: config.sms_accessno.clone(),
            service_id: config.service_id.clone(),
            msg_src: config.user.clone(),
        }
    }
}

/// Sending half of the ingress channel. Enqueueing blocks while the
/// channel is full.
#[derive(Clone)]
pub struct SubmitQueue {
    tx: mpsc::Sender<Submission>,
}

impl SubmitQueue {
    pub async fn enqueue(&self, submission: Submission) -> anyhow::Result<()> {
        self.tx
            .send(submission)
            .await
            .map_err(|_| anyhow::anyhow!("submission pipeline is shut down"))
    }
}

/// Create the bounded ingress channel.
pub fn channel(capacity: usize) -> (SubmitQueue, mpsc::Receiver<Submission>) {
    let (tx, rx) = mpsc::channel(capacity);
    (SubmitQueue { tx }, rx)
}

pub struct SubmitWorker {
    rx: mpsc::Receiver<Submission>,
    manager: Arc<SessionManager>,
    store: SharedStore,
    config: PipelineConfig,
    shutdown: CancellationToken,
}

impl SubmitWorker {
    pub fn new(
        rx: mpsc::Receiver<Submission>,
        manager: Arc<SessionManager>,
        store: SharedStore,
        config: PipelineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            rx,
            manager,
            store,
            config,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!("submission worker started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                submission = self.rx.recv() => match submission {
                    Some(submission) => self.process(submission).await,
                    None => break,
                }
            }
        }
        info!("submission worker stopped");
    }

    async fn process(&self, submission: Submission) {
        let mut record = MessageRecord::outbound(
            &submission.source,
            &submission.destination,
            &submission.content,
        );

        if let Err(e) = validate_submit(
            &submission.source,
            &submission.destination,
            &submission.content,
        ) {
            warn!(error = %e, dest = %submission.destination, "submission rejected");
            self.record_local_failure(record, RESULT_REJECTED_LOCAL, MSG_ID_ERROR);
            return;
        }

        let src_id = match derive_source(&self.config.access_no, &submission.source) {
            Ok(src_id) => src_id,
            Err(e) => {
                warn!(error = %e, "oversized composite source");
                self.record_local_failure(record, RESULT_REJECTED_LOCAL, MSG_ID_ERROR);
                return;
            }
        };

        let req = self.build_submit(&src_id, &submission);
        match self.manager.submit(req, &record).await {
            Ok(seq) => {
                counters::submit_sent();
                debug!(seq, dest = %submission.destination, "submit on the wire");
            }
            Err(e) => {
                warn!(error = %e, dest = %submission.destination, "submit send failed");
                record.submit_result = RESULT_SEND_FAILED;
                record.message_id = MSG_ID_SEND_ERROR.to_string();
                counters::submit_completed(false);
                if let Err(store_err) = self.store.append_outbound(&record) {
                    warn!(error = %store_err, "failed to log send failure");
                }
            }
        }
    }

    fn record_local_failure(&self, mut record: MessageRecord, result: u32, msg_id: &str) {
        record.submit_result = result;
        record.message_id = msg_id.to_string();
        counters::submit_completed(false);
        if let Err(e) = self.store.append_outbound(&record) {
            warn!(error = %e, "failed to log rejected submission");
        }
    }

    fn build_submit(&self, src_id: &str, submission: &Submission) -> SubmitReq {
        SubmitReq {
            msg_id: 0,
            pk_total: 1,
            pk_number: 1,
            registered_delivery: 0,
            msg_level: 1,
            service_id: self.config.service_id.clone(),
            fee_user_type: 0,
            fee_terminal_id: String::new(),
            fee_terminal_type: 0,
            tp_pid: 0,
            tp_udhi: 0,
            msg_fmt: 0,
            msg_src: self.config.msg_src.clone(),
            fee_type: "01".to_string(),
            fee_code: "000000".to_string(),
            valid_time: String::new(),
            at_time: String::new(),
            src_id: src_id.to_string(),
            dest_usr_tl: 1,
            dest_terminal_id: vec![submission.destination.clone()],
            dest_terminal_type: 0,
            msg_content: submission.content.as_bytes().to_vec(),
            link_id: String::new(),
        }
    }
}
