//! One authenticated CMPP connection.
//!
//! Sends are serialized by a mutex over the write half so concurrent
//! tasks never interleave frames on the wire; the read half has a single
//! caller (the manager's receiver task). Closing is idempotent and every
//! operation afterwards fails with a terminal error.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use crate::codec::{CmppCodec, ConnectReq, Frame, Packet};
use crate::telemetry::counters;

use super::SessionError;

/// Connection parameters for the SMSC peer.
#[derive(Debug, Clone)]
pub struct CmppConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl CmppConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            host: config.cmpp_host.clone(),
            port: config.cmpp_port,
            user: config.user.clone(),
            password: config.password.clone(),
            connect_timeout: Duration::from_secs(2),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

type Sink = SplitSink<Framed<TcpStream, CmppCodec>, Packet>;
type Stream = SplitStream<Framed<TcpStream, CmppCodec>>;

pub struct Session {
    sink: Mutex<Sink>,
    stream: Mutex<Stream>,
    peer: String,
    seq: AtomicU32,
    closed: AtomicBool,
}

impl Session {
    /// Establish the TCP connection and run the CMPP handshake. Both the
    /// connect and the handshake are bounded by `connect_timeout`;
    /// failure leaves no usable session behind.
    pub async fn connect(config: &CmppConfig) -> Result<Self, SessionError> {
        let addr = config.addr();

        let stream = timeout(config.connect_timeout, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| SessionError::ConnectTimeout)??;

        let mut framed = Framed::new(stream, CmppCodec::new());

        let req = ConnectReq::new(&config.user, &config.password);
        framed
            .send(Packet {
                seq: 1,
                frame: Frame::Connect(req),
            })
            .await?;

        let reply = timeout(config.connect_timeout, framed.next())
            .await
            .map_err(|_| SessionError::ConnectTimeout)?
            .ok_or(SessionError::Closed)??;

        match reply.frame {
            Frame::ConnectResp(resp) if resp.status == 0 => {
                info!(peer = %addr, "connected and authenticated");
            }
            Frame::ConnectResp(resp) => return Err(SessionError::Handshake(resp.status)),
            other => return Err(SessionError::UnexpectedFrame(other.command())),
        }

        let (sink, stream) = framed.split();
        Ok(Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            peer: addr,
            seq: AtomicU32::new(2),
            closed: AtomicBool::new(false),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Allocate the next wire sequence identifier.
    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Write a request frame under a fresh sequence id and return it.
    pub async fn send_request(&self, frame: Frame) -> Result<u32, SessionError> {
        let seq = self.next_seq();
        self.send(Packet { seq, frame }).await?;
        Ok(seq)
    }

    /// Write a response frame echoing the peer's sequence id.
    pub async fn send_response(&self, frame: Frame, seq: u32) -> Result<(), SessionError> {
        self.send(Packet { seq, frame }).await
    }

    /// Write a request frame under a caller-allocated sequence id. Used
    /// when the caller must record the id before the frame hits the wire.
    pub async fn send_with_seq(&self, frame: Frame, seq: u32) -> Result<(), SessionError> {
        self.send(Packet { seq, frame }).await
    }

    async fn send(&self, pkt: Packet) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        let command = pkt.frame.command();
        let mut sink = self.sink.lock().await;
        sink.send(pkt).await?;
        counters::frame_sent(command.name());
        Ok(())
    }

    /// Read exactly one frame, blocking until it arrives or the transport
    /// fails. Any error means the session is broken.
    pub async fn receive(&self) -> Result<Packet, SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        let mut stream = self.stream.lock().await;
        match stream.next().await {
            Some(Ok(pkt)) => {
                counters::frame_received(pkt.frame.command().name());
                Ok(pkt)
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(SessionError::Closed),
        }
    }

    /// Close the connection. Safe to call repeatedly.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(peer = %self.peer, "closing session");
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }
}
