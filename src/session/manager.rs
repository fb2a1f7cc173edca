//! Session manager: keeps one authenticated session alive and routes
//! every inbound frame.
//!
//! Three rules govern the concurrency here:
//!
//! - at most one receiver task exists at a time, enforced by a
//!   compare-and-set guard
//! - senders snapshot the session under a read guard and fail with
//!   `NotReady` if readiness was lost; the session itself errors if it
//!   was closed between check and use
//! - only the heartbeat task reconnects; a failed send just surfaces the
//!   error and drops readiness

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{
    ActiveTestReq, ActiveTestResp, DeliverReq, DeliverResp, Frame, Packet, SubmitReq, SubmitResp,
    TerminateResp,
};
use crate::store::{MessageRecord, SharedStore};
use crate::telemetry::counters;

use super::session::{CmppConfig, Session};
use super::SessionError;

/// Heartbeats allowed to go unanswered before the session is declared dead.
const MAX_MISSED_HEARTBEATS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ManagerState {
    Disconnected = 0,
    Connecting = 1,
    Ready = 2,
    /// Terminal: shutdown has begun.
    Draining = 3,
}

impl ManagerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ManagerState::Connecting,
            2 => ManagerState::Ready,
            3 => ManagerState::Draining,
            _ => ManagerState::Disconnected,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ManagerState::Disconnected => "disconnected",
            ManagerState::Connecting => "connecting",
            ManagerState::Ready => "ready",
            ManagerState::Draining => "draining",
        }
    }
}

pub struct SessionManager {
    config: CmppConfig,
    store: SharedStore,

    /// Guarded session reference. Writers: connect/disconnect.
    /// Readers: every send and the receiver loop.
    session: RwLock<Option<Arc<Session>>>,

    state: AtomicU8,
    missed_heartbeats: AtomicU32,

    receiver_running: AtomicBool,
    receiver_stop: StdMutex<Option<CancellationToken>>,
    receiver_task: StdMutex<Option<JoinHandle<()>>>,
    heartbeat_task: StdMutex<Option<JoinHandle<()>>>,

    shutdown: CancellationToken,
    shutdown_done: AtomicBool,
}

impl SessionManager {
    pub fn new(config: CmppConfig, store: SharedStore) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            session: RwLock::new(None),
            state: AtomicU8::new(ManagerState::Disconnected as u8),
            missed_heartbeats: AtomicU32::new(0),
            receiver_running: AtomicBool::new(false),
            receiver_stop: StdMutex::new(None),
            receiver_task: StdMutex::new(None),
            heartbeat_task: StdMutex::new(None),
            shutdown: CancellationToken::new(),
            shutdown_done: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ManagerState::Ready
    }

    pub fn receiver_running(&self) -> bool {
        self.receiver_running.load(Ordering::Acquire)
    }

    fn set_state(&self, next: ManagerState) {
        let prev = ManagerState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if prev != next {
            debug!(from = prev.name(), to = next.name(), "session state changed");
        }
    }

    fn mark_not_ready(&self) {
        if self.state() == ManagerState::Draining {
            return;
        }
        self.set_state(ManagerState::Disconnected);
    }

    fn mark_ready(&self) {
        if self.state() == ManagerState::Draining {
            return;
        }
        self.set_state(ManagerState::Ready);
    }

    /// Attempt the initial connection and spawn the heartbeat task. A
    /// failed first connect is not fatal; the heartbeat retries.
    pub async fn start(self: Arc<Self>) {
        match self.connect().await {
            Ok(()) => Arc::clone(&self).start_receiver(),
            Err(e) => warn!(error = %e, "initial connect failed, heartbeat will retry"),
        }

        let manager = Arc::clone(&self);
        let handle = tokio::spawn(async move { manager.heartbeat_loop().await });
        *self.heartbeat_task.lock().unwrap() = Some(handle);
    }

    /// Replace the session with a freshly authenticated one.
    pub async fn connect(&self) -> Result<(), SessionError> {
        if self.state() == ManagerState::Draining {
            return Err(SessionError::Closed);
        }
        self.set_state(ManagerState::Connecting);

        {
            let mut guard = self.session.write().await;
            if let Some(old) = guard.take() {
                old.close().await;
            }
        }

        match Session::connect(&self.config).await {
            Ok(session) => {
                *self.session.write().await = Some(Arc::new(session));
                self.missed_heartbeats.store(0, Ordering::Relaxed);
                self.mark_ready();
                Ok(())
            }
            Err(e) => {
                self.mark_not_ready();
                Err(e)
            }
        }
    }

    pub async fn disconnect(&self) {
        let session = self.session.write().await.take();
        if let Some(session) = session {
            session.close().await;
        }
        self.mark_not_ready();
    }

    /// Snapshot the current session if the manager is ready.
    async fn current_session(&self) -> Result<Arc<Session>, SessionError> {
        let guard = self.session.read().await;
        if self.state() != ManagerState::Ready {
            return Err(SessionError::NotReady);
        }
        guard.clone().ok_or(SessionError::NotReady)
    }

    /// Send a request frame; any send error drops readiness.
    pub async fn send_request(&self, frame: Frame) -> Result<u32, SessionError> {
        let session = self.current_session().await?;
        match session.send_request(frame).await {
            Ok(seq) => Ok(seq),
            Err(e) => {
                self.mark_not_ready();
                Err(e)
            }
        }
    }

    /// Send a response frame under the peer's sequence id.
    pub async fn send_response(&self, frame: Frame, seq: u32) -> Result<(), SessionError> {
        let session = self.current_session().await?;
        match session.send_response(frame, seq).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mark_not_ready();
                Err(e)
            }
        }
    }

    /// Transmit a submit and park its record. The record is parked under
    /// the allocated sequence id before the frame reaches the wire, so
    /// the receiver can never observe a response without a parked entry.
    /// On send failure the entry is unparked and the error surfaced.
    pub async fn submit(
        &self,
        req: SubmitReq,
        record: &MessageRecord,
    ) -> Result<u32, SessionError> {
        let session = self.current_session().await?;
        let seq = session.next_seq();

        self.store
            .put_pending(seq, record)
            .map_err(SessionError::Store)?;

        if let Err(e) = session.send_with_seq(Frame::Submit(req), seq).await {
            if let Err(store_err) = self.store.take_pending(seq) {
                warn!(seq, error = %store_err, "failed to unpark record after send error");
            }
            self.mark_not_ready();
            return Err(e);
        }
        Ok(seq)
    }

    /// Spawn the receiver task. Concurrent calls collapse to one task.
    pub fn start_receiver(self: Arc<Self>) {
        if self
            .receiver_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("receiver already running");
            return;
        }

        let stop = self.shutdown.child_token();
        *self.receiver_stop.lock().unwrap() = Some(stop.clone());

        let manager = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            info!("receiver started");
            manager.receive_loop(stop).await;
            manager.receiver_running.store(false, Ordering::Release);
            info!("receiver stopped");
        });
        *self.receiver_task.lock().unwrap() = Some(handle);
    }

    /// Signal the receiver task to exit.
    pub fn stop_receiver(&self) {
        if let Some(stop) = self.receiver_stop.lock().unwrap().take() {
            stop.cancel();
        }
    }

    async fn receive_loop(&self, stop: CancellationToken) {
        loop {
            if self.state() != ManagerState::Ready {
                break;
            }
            let session = {
                let guard = self.session.read().await;
                guard.clone()
            };
            let Some(session) = session else { break };

            tokio::select! {
                _ = stop.cancelled() => break,
                received = session.receive() => match received {
                    Ok(pkt) => self.handle_packet(pkt).await,
                    Err(e) => {
                        warn!(error = %e, "receive failed, marking not ready");
                        self.mark_not_ready();
                        break;
                    }
                }
            }
        }
    }

    async fn handle_packet(&self, pkt: Packet) {
        match pkt.frame {
            Frame::SubmitResp(resp) => self.handle_submit_resp(pkt.seq, resp).await,
            Frame::Deliver(req) => self.handle_deliver(pkt.seq, req).await,
            Frame::ActiveTest(_) => {
                debug!(seq = pkt.seq, "active test request");
                let resp = Frame::ActiveTestResp(ActiveTestResp { reserved: 0 });
                if let Err(e) = self.send_response(resp, pkt.seq).await {
                    warn!(error = %e, "failed to answer active test");
                }
            }
            Frame::ActiveTestResp(_) => {
                debug!(seq = pkt.seq, "active test response");
                self.missed_heartbeats.store(0, Ordering::Relaxed);
                self.mark_ready();
            }
            Frame::Terminate(_) => {
                warn!(seq = pkt.seq, "terminate request from smsc");
                if let Err(e) = self
                    .send_response(Frame::TerminateResp(TerminateResp), pkt.seq)
                    .await
                {
                    warn!(error = %e, "failed to answer terminate");
                }
                self.mark_not_ready();
            }
            Frame::TerminateResp(_) => {
                info!(seq = pkt.seq, "terminate response from smsc");
                self.mark_not_ready();
            }
            other => {
                debug!(command = other.command().name(), seq = pkt.seq, "unexpected frame");
            }
        }
    }

    async fn handle_submit_resp(&self, seq: u32, resp: SubmitResp) {
        info!(
            seq,
            msg_id = resp.msg_id,
            result = resp.result,
            "submit response"
        );

        match self.store.take_pending(seq) {
            Ok(Some(mut record)) => {
                record.message_id = resp.msg_id.to_string();
                record.submit_result = resp.result;
                counters::submit_completed(resp.result == 0);
                if let Err(e) = self.store.append_outbound(&record) {
                    error!(seq, error = %e, "failed to log completed submit");
                }
            }
            Ok(None) => {
                counters::correlation_miss();
                warn!(seq, "no pending record for submit response, dropping");
            }
            Err(e) => {
                warn!(seq, error = %e, "pending lookup failed");
            }
        }
    }

    async fn handle_deliver(&self, seq: u32, req: DeliverReq) {
        info!(
            seq,
            msg_id = req.msg_id,
            src = %req.src_terminal_id,
            dest = %req.dest_id,
            "deliver request"
        );

        let content = String::from_utf8_lossy(&req.msg_content);
        let record = MessageRecord::inbound(
            &req.src_terminal_id,
            &req.dest_id,
            &content,
            req.msg_id.to_string(),
        );
        counters::deliver_received();
        if let Err(e) = self.store.append_inbound(&record) {
            error!(seq, error = %e, "failed to log inbound message");
        }

        let resp = Frame::DeliverResp(DeliverResp {
            msg_id: req.msg_id,
            result: 0,
        });
        if let Err(e) = self.send_response(resp, seq).await {
            warn!(error = %e, "failed to answer deliver");
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let period = self.config.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_ms = period.as_millis() as u64, "heartbeat started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => Arc::clone(&self).heartbeat_tick().await,
            }
        }
        info!("heartbeat stopped");
    }

    async fn heartbeat_tick(self: Arc<Self>) {
        match self.state() {
            ManagerState::Draining => {}
            ManagerState::Ready => {
                if self.missed_heartbeats.load(Ordering::Relaxed) >= MAX_MISSED_HEARTBEATS {
                    warn!("heartbeats unanswered, dropping session");
                    self.mark_not_ready();
                    self.reconnect().await;
                    return;
                }

                self.missed_heartbeats.fetch_add(1, Ordering::Relaxed);
                counters::heartbeat_sent();
                if let Err(e) = self.send_request(Frame::ActiveTest(ActiveTestReq)).await {
                    warn!(error = %e, "heartbeat send failed, reconnecting");
                    self.reconnect().await;
                }
            }
            _ => self.reconnect().await,
        }
    }

    /// Stop the old receiver, re-establish the session and start a fresh
    /// receiver. Only ever invoked from the heartbeat task.
    async fn reconnect(self: Arc<Self>) {
        self.stop_receiver();
        match self.connect().await {
            Ok(()) => {
                counters::reconnect();
                self.start_receiver();
            }
            Err(e) => error!(error = %e, "reconnect failed"),
        }
    }

    /// Drain and release everything. Safe to call more than once; later
    /// calls are no-ops.
    pub async fn shutdown(&self) {
        if self.shutdown_done.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down session manager");

        self.set_state(ManagerState::Draining);
        self.shutdown.cancel();
        self.stop_receiver();

        let receiver = self.receiver_task.lock().unwrap().take();
        if let Some(handle) = receiver {
            let _ = handle.await;
        }
        let heartbeat = self.heartbeat_task.lock().unwrap().take();
        if let Some(handle) = heartbeat {
            let _ = handle.await;
        }

        let session = self.session.write().await.take();
        if let Some(session) = session {
            session.close().await;
        }

        info!("session manager shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn unreachable_config() -> CmppConfig {
        CmppConfig {
            host: "127.0.0.1".into(),
            port: 1,
            user: "900001".into(),
            password: "secret".into(),
            connect_timeout: Duration::from_millis(200),
            heartbeat_interval: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn send_fails_when_disconnected() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(unreachable_config(), store);

        let err = manager
            .send_request(Frame::ActiveTest(ActiveTestReq))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotReady));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(unreachable_config(), store);
        Arc::clone(&manager).start().await;

        manager.shutdown().await;
        manager.shutdown().await;
        assert_eq!(manager.state(), ManagerState::Draining);
    }

    #[tokio::test]
    async fn connect_failure_leaves_manager_disconnected() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(unreachable_config(), store);

        assert!(manager.connect().await.is_err());
        assert_eq!(manager.state(), ManagerState::Disconnected);
        assert!(!manager.is_ready());
    }

    #[tokio::test]
    async fn receiver_start_without_session_winds_down() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(unreachable_config(), store);

        Arc::clone(&manager).start_receiver();
        // the loop observes the manager is not ready and exits
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!manager.receiver_running());
    }
}
